// The façade the command layer talks to.
//
// Owns the per-user sessions and wires locators to the orchestrator, the
// replicator and the external download agent. Multi-locator commands run as
// batches: a failed item is recorded and the next one starts, a cancelled
// item ends the batch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::drive_error::DriveError;
use super::drive_models::{
    BatchReport, ExternalSource, FolderOutcome, ItemOutcome, ListOrder, ListQuery,
    RemoteObjectRef, TransferJob, TransferMode, TransferSummary,
};
use super::drive_ports::{ExternalDownloader, PublicShare, RemoteDrive, StatusChannel};
use super::locator::{Locator, PathResolver};
use super::progress::ProgressReporter;
use super::replicator::{RecursiveReplicator, DRIVE_ROOT_ALIAS};
use super::session::{JobContext, SessionRegistry};
use super::transfer_service::{TransferConfig, TransferOrchestrator};

pub const DEFAULT_LIST_LIMIT: u32 = 25;
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Per-target result of lookups such as `check` and `rm`.
pub type LookupResults = Vec<(String, Result<RemoteObjectRef, DriveError>)>;

pub struct DriveService<D: RemoteDrive, P: PublicShare, X: ExternalDownloader> {
    drive: Arc<D>,
    downloader: Arc<X>,
    orchestrator: Arc<TransferOrchestrator<D, P>>,
    replicator: RecursiveReplicator<D, P>,
    resolver: PathResolver,
    sessions: SessionRegistry,
}

impl<D, P, X> DriveService<D, P, X>
where
    D: RemoteDrive + 'static,
    P: PublicShare + 'static,
    X: ExternalDownloader,
{
    pub fn new(
        drive: Arc<D>,
        share: Arc<P>,
        downloader: Arc<X>,
        resolver: PathResolver,
        config: TransferConfig,
        default_root: Option<String>,
    ) -> Self {
        let orchestrator = Arc::new(TransferOrchestrator::new(drive.clone(), share, config));
        Self {
            drive,
            downloader,
            replicator: RecursiveReplicator::new(orchestrator.clone()),
            orchestrator,
            resolver,
            sessions: SessionRegistry::new(default_root),
        }
    }

    fn config(&self) -> &TransferConfig {
        self.orchestrator.config()
    }

    /// Start a top-level command for `user_id` with its own cancellation signal.
    pub async fn begin_job(&self, user_id: u64, status: Arc<dyn StatusChannel>) -> JobContext {
        self.sessions.session(user_id).begin_job(status).await
    }

    /// Cancel every running job of the user and every external agent download.
    pub async fn abort(&self, user_id: u64) -> bool {
        let triggered = self.sessions.session(user_id).abort().await;
        if let Err(e) = self.downloader.cancel_all().await {
            tracing::warn!("Failed to cancel external downloads: {}", e);
        }
        tracing::info!(user_id, triggered, "Abort requested");
        triggered
    }

    // ========================================================================
    // BATCH TRANSFERS
    // ========================================================================

    /// Whatever the locators point at ends up in (or comes out of) the drive:
    /// local paths are uploaded, remote ids downloaded, external sources
    /// fetched by the agent and then uploaded.
    pub async fn ingest(&self, job: &JobContext, locators: &str) -> BatchReport {
        self.run_batch(job, locators, |locator| self.ingest_one(job, locator))
            .await
    }

    /// Download remote files into the staging directory.
    pub async fn download(&self, job: &JobContext, locators: &str) -> BatchReport {
        self.run_batch(job, locators, |locator| async move {
            let id = self.expect_remote_id(locator)?;
            let outcome = self
                .orchestrator
                .download(&id, &self.config().staging_dir, job)
                .await?;
            Ok(TransferSummary::Downloaded(outcome))
        })
        .await
    }

    /// Server-side copy of files or whole folders into the job destination.
    pub async fn clone_remote(&self, job: &JobContext, locators: &str) -> BatchReport {
        self.run_batch(job, locators, |locator| async move {
            let id = self.expect_remote_id(locator)?;
            let source = self.drive.get_metadata(&id).await?;
            let destination = job.destination.as_deref();

            if !source.is_container {
                let object = self.orchestrator.copy(&source, destination, job).await?;
                let size_bytes = object.size_bytes.unwrap_or(0);
                return Ok(TransferSummary::Copied { object, size_bytes });
            }

            let summary = self
                .replicator
                .copy_remote_directory(&source, destination, job)
                .await?;
            let object = self.drive.get_metadata(&summary.container_id).await?;
            let size_bytes = self
                .replicator
                .count_size(&summary.container_id, &job.signal)
                .await?;
            Ok(TransferSummary::Copied { object, size_bytes })
        })
        .await
    }

    async fn run_batch<'a, F, Fut>(&self, job: &JobContext, locators: &'a str, run: F) -> BatchReport
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = Result<TransferSummary, DriveError>>,
    {
        let mut report = BatchReport::default();
        for locator in locators.split_whitespace() {
            if job.signal.is_set() {
                report.push(locator, ItemOutcome::Cancelled);
                break;
            }
            match run(locator).await {
                Ok(summary) => report.push(locator, ItemOutcome::Completed(Box::new(summary))),
                Err(DriveError::Cancelled) => {
                    tracing::info!(job_id = %job.job_id, %locator, "Batch cancelled");
                    report.push(locator, ItemOutcome::Cancelled);
                    break;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, %locator, "Batch item failed: {}", e);
                    report.push(locator, ItemOutcome::Failed(e.to_string()));
                }
            }
        }
        report
    }

    async fn ingest_one(&self, job: &JobContext, locator: &str) -> Result<TransferSummary, DriveError> {
        match self.resolver.resolve(locator) {
            Locator::Local(path) => self.upload_path(&path, job).await,
            Locator::RemoteId(id) => {
                let outcome = self
                    .orchestrator
                    .download(&id, &self.config().staging_dir, job)
                    .await?;
                Ok(TransferSummary::Downloaded(outcome))
            }
            Locator::External(source) => {
                let fetched = self.fetch_external(&source, job).await?;
                let summary = self.upload_path(&fetched, job).await?;
                remove_local(&fetched).await;
                Ok(summary)
            }
            Locator::Unparseable(raw) => Err(DriveError::InvalidInput(format!(
                "`{}` is not a local path, drive link, id, URL or magnet link",
                raw
            ))),
        }
    }

    async fn upload_path(&self, path: &Path, job: &JobContext) -> Result<TransferSummary, DriveError> {
        let destination = job.destination.as_deref();
        if !tokio::fs::metadata(path).await?.is_dir() {
            let outcome = self.orchestrator.upload(path, destination, job).await?;
            return Ok(TransferSummary::Uploaded(outcome));
        }

        let summary = self
            .replicator
            .mirror_local_directory(path, destination, job)
            .await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size_bytes = self
            .replicator
            .count_size(&summary.container_id, &job.signal)
            .await?;
        Ok(TransferSummary::UploadedFolder {
            link: folder_link(&summary.container_id),
            name,
            size_bytes,
            summary,
        })
    }

    fn expect_remote_id(&self, locator: &str) -> Result<String, DriveError> {
        match self.resolver.resolve(locator) {
            Locator::RemoteId(id) => Ok(id),
            _ => Err(DriveError::InvalidInput(format!(
                "`{}` is not a drive link or id",
                locator
            ))),
        }
    }

    // ========================================================================
    // EXTERNAL AGENT
    // ========================================================================

    /// Hand a URL, magnet or torrent to the agent and wait for it to finish.
    /// Returns the path of what it downloaded inside the staging directory.
    async fn fetch_external(
        &self,
        source: &ExternalSource,
        job: &JobContext,
    ) -> Result<PathBuf, DriveError> {
        let target = self.config().staging_dir.clone();
        tokio::fs::create_dir_all(&target).await?;

        let mut agent_job = match source {
            ExternalSource::Uri(uri) => self.downloader.add_uri(uri, &target).await?,
            ExternalSource::TorrentFile(path) => self.downloader.add_torrent(path, &target).await?,
        };
        tracing::info!(job_id = %job.job_id, agent_job = %agent_job, "Queued external download");

        let mut reporter =
            ProgressReporter::new(job.status.clone(), self.config().progress_interval_secs);
        let mut tracked_name: Option<String> = None;
        let mut transfer = TransferJob::new(
            TransferMode::Download,
            agent_job.clone(),
            Some(target.display().to_string()),
            String::new(),
            0,
        );

        loop {
            if let Err(e) = job.signal.check() {
                self.cancel_external(&target, tracked_name.as_deref()).await;
                return Err(e);
            }

            let status = self.downloader.poll_status(&agent_job).await?;
            if let Some(message) = status.error_message {
                let name = Some(status.name.as_str())
                    .filter(|n| !n.is_empty())
                    .or(tracked_name.as_deref());
                self.discard_external(&agent_job, &target, name).await;
                return Err(DriveError::Transfer(message));
            }
            if !status.name.is_empty() {
                tracked_name = Some(status.name.clone());
            }

            if status.complete {
                // A magnet link finishes by spawning the real download.
                if let Some(next) = status.followed_by.first() {
                    tracing::debug!(from = %agent_job, to = %next, "Following spawned download");
                    agent_job = next.clone();
                    continue;
                }
                let name = tracked_name.ok_or_else(|| {
                    DriveError::Transfer("download agent finished without a file name".to_string())
                })?;
                return Ok(target.join(name));
            }

            if status.total_bytes > 0 {
                transfer.file_name = status.name.clone();
                transfer.bytes_total = status.total_bytes;
                transfer.set_transferred(status.completed_bytes);
                reporter.observe(&transfer.snapshot()).await;
            }

            if let Err(e) = job.signal.sleep(self.config().external_poll_interval).await {
                self.cancel_external(&target, tracked_name.as_deref()).await;
                return Err(e);
            }
        }
    }

    async fn discard_external(&self, agent_job: &str, target: &Path, name: Option<&str>) {
        if let Err(e) = self.downloader.discard(agent_job).await {
            tracing::warn!(agent_job = %agent_job, "Failed to discard failed download: {}", e);
        }
        if let Some(name) = name {
            remove_local(&target.join(name)).await;
        }
    }

    async fn cancel_external(&self, target: &Path, name: Option<&str>) {
        if let Err(e) = self.downloader.cancel_all().await {
            tracing::warn!("Failed to cancel external downloads: {}", e);
        }
        if let Some(name) = name {
            remove_local(&target.join(name)).await;
        }
    }

    // ========================================================================
    // MANAGEMENT
    // ========================================================================

    /// Search by name and/or parent, newest first, up to `limit` results.
    pub async fn list(
        &self,
        job: &JobContext,
        name: Option<&str>,
        parent: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<RemoteObjectRef>, DriveError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(DriveError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_LIST_LIMIT
            )));
        }
        let parent_id = parent
            .map(|p| self.resolver.resolve_container(p))
            .transpose()?;

        let query = ListQuery {
            parent_id,
            name_contains: name.map(str::to_string),
            page_size: limit,
            order: ListOrder::RecentlyModified,
            ..Default::default()
        };

        let mut results = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            job.signal.check()?;
            let page = self.drive.list_children(&query, page_token.as_deref()).await?;
            results.extend(page.items);
            if results.len() >= limit as usize {
                results.truncate(limit as usize);
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(results)
    }

    /// Create `;`-separated folders in the job destination, reusing same-named ones.
    pub async fn make_folders(
        &self,
        job: &JobContext,
        names: &str,
    ) -> Result<Vec<FolderOutcome>, DriveError> {
        let names: Vec<&str> = names
            .split(';')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(DriveError::InvalidInput("no folder names given".to_string()));
        }

        let destination = job.destination.as_deref();
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            job.signal.check()?;
            let query = ListQuery {
                parent_id: Some(destination.unwrap_or(DRIVE_ROOT_ALIAS).to_string()),
                exact_name: Some(name.to_string()),
                containers_only: true,
                page_size: 1,
                ..Default::default()
            };
            let existing = self.drive.list_children(&query, None).await?;
            if let Some(folder) = existing.items.into_iter().next() {
                outcomes.push(FolderOutcome::Existing(folder));
                continue;
            }

            let id = self.drive.create_container(name, destination).await?;
            if let Err(e) = self.drive.set_public_readable(&id).await {
                tracing::warn!(folder = %name, "Could not share folder publicly: {}", e);
            }
            let folder = self.drive.get_metadata(&id).await?;
            tracing::info!(folder = %name, id = %id, "Created folder");
            outcomes.push(FolderOutcome::Created(folder));
        }
        Ok(outcomes)
    }

    /// Permanently delete `;`-separated names, links or ids.
    pub async fn remove(&self, job: &JobContext, targets: &str) -> Result<LookupResults, DriveError> {
        let mut results = Vec::new();
        for target in split_targets(targets)? {
            job.signal.check()?;
            let outcome = match self.lookup(target).await {
                Ok(object) => self.drive.delete_object(&object.id).await.map(|_| {
                    tracing::info!(id = %object.id, name = %object.name, "Deleted");
                    object
                }),
                Err(e) => Err(e),
            };
            results.push((target.to_string(), outcome));
        }
        Ok(results)
    }

    /// Metadata for `;`-separated names, links or ids.
    pub async fn inspect(&self, job: &JobContext, targets: &str) -> Result<LookupResults, DriveError> {
        let mut results = Vec::new();
        for target in split_targets(targets)? {
            job.signal.check()?;
            results.push((target.to_string(), self.lookup(target).await));
        }
        Ok(results)
    }

    /// An object's metadata plus its total size (recursive for folders).
    pub async fn size_of(
        &self,
        job: &JobContext,
        target: &str,
    ) -> Result<(RemoteObjectRef, u64), DriveError> {
        let object = self.lookup(target.trim()).await?;
        let size = if object.is_container {
            self.replicator.count_size(&object.id, &job.signal).await?
        } else {
            object.size_bytes.unwrap_or(0)
        };
        Ok((object, size))
    }

    /// Exact name first (anywhere in the drive), then link or id.
    async fn lookup(&self, target: &str) -> Result<RemoteObjectRef, DriveError> {
        let by_name = ListQuery {
            exact_name: Some(target.to_string()),
            page_size: 1,
            ..Default::default()
        };
        if let Some(found) = self.drive.list_children(&by_name, None).await?.items.into_iter().next() {
            return Ok(found);
        }

        let id = match self.resolver.resolve(target) {
            Locator::RemoteId(id) => id,
            _ => self.resolver.resolve_container(target).map_err(|_| {
                DriveError::remote(404, format!("`{}` not found by name, link or id", target))
            })?,
        };
        self.drive.get_metadata(&id).await
    }

    /// Point the user's uploads at a folder. Returns the folder id.
    pub async fn set_destination(&self, user_id: u64, raw: &str) -> Result<String, DriveError> {
        let id = self.resolver.resolve_container(raw)?;
        let folder = self.drive.get_metadata(&id).await?;
        if !folder.is_container {
            return Err(DriveError::InvalidInput(format!(
                "{} is a file, not a folder",
                folder.name
            )));
        }
        self.sessions.session(user_id).set_destination(id.clone()).await;
        tracing::info!(user_id, folder = %id, "Upload destination set");
        Ok(id)
    }

    /// Back to the configured root. Returns the dropped override, if any.
    pub async fn clear_destination(&self, user_id: u64) -> Option<String> {
        self.sessions.session(user_id).clear_destination().await
    }

    /// `<index>/<urlencoded name>`, with a trailing slash for folders.
    pub fn index_link(&self, name: &str, is_folder: bool) -> Option<String> {
        self.config().index_url.as_ref().map(|base| {
            let mut link = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                urlencoding::encode(name)
            );
            if is_folder {
                link.push('/');
            }
            link
        })
    }
}

pub fn folder_link(id: &str) -> String {
    format!("https://drive.google.com/drive/folders/{}", id)
}

fn split_targets(raw: &str) -> Result<Vec<&str>, DriveError> {
    let targets: Vec<&str> = raw
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(DriveError::InvalidInput("nothing to look up".to_string()));
    }
    Ok(targets)
}

async fn remove_local(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), "Failed to clean up staged download: {}", e);
    }
}

// Recursive tree replication: local directory -> remote, remote -> remote.
//
// Walks are depth-first pre-order. Parent ids are passed explicitly on every
// call, so recursion never touches the user's session destination.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use super::cancellation::CancellationSignal;
use super::drive_error::DriveError;
use super::drive_models::{ItemFailure, ListQuery, RemoteObjectRef, ReplicationSummary};
use super::drive_ports::{PublicShare, RemoteDrive};
use super::progress::ProgressReporter;
use super::session::JobContext;
use super::transfer_service::TransferOrchestrator;

/// Alias the remote service accepts for the top of the drive.
pub const DRIVE_ROOT_ALIAS: &str = "root";

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DriveError>> + Send + 'a>>;
type SizeFuture<'a> = Pin<Box<dyn Future<Output = Result<u64, DriveError>> + Send + 'a>>;

enum EntryKind {
    File,
    Dir,
    /// Metadata could not be read, e.g. a dangling symlink.
    Unreadable(String),
}

struct LocalEntry {
    name: String,
    path: PathBuf,
    kind: EntryKind,
}

pub struct RecursiveReplicator<D: RemoteDrive, P: PublicShare> {
    orchestrator: Arc<TransferOrchestrator<D, P>>,
}

impl<D: RemoteDrive + 'static, P: PublicShare + 'static> RecursiveReplicator<D, P> {
    pub fn new(orchestrator: Arc<TransferOrchestrator<D, P>>) -> Self {
        Self { orchestrator }
    }

    fn drive(&self) -> &Arc<D> {
        self.orchestrator.drive()
    }

    fn max_depth(&self) -> usize {
        self.orchestrator.config().max_depth
    }

    // ========================================================================
    // LOCAL -> REMOTE
    // ========================================================================

    /// Mirror `source_dir` under `destination` as a container of the same name.
    ///
    /// An empty directory creates nothing and returns the destination id.
    pub async fn mirror_local_directory(
        &self,
        source_dir: &Path,
        destination: Option<&str>,
        job: &JobContext,
    ) -> Result<ReplicationSummary, DriveError> {
        job.signal.check()?;

        let entries = read_sorted_entries(source_dir).await?;
        if entries.is_empty() {
            tracing::info!(dir = %source_dir.display(), "Nothing to upload in empty directory");
            return Ok(ReplicationSummary::empty(
                destination.unwrap_or(DRIVE_ROOT_ALIAS),
            ));
        }

        let name = source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DriveError::InvalidInput(format!("{} has no folder name", source_dir.display()))
            })?;

        let container = self.ensure_container(&name, destination).await?;
        self.share_top_level(&container, &name).await;
        ProgressReporter::new(job.status.clone(), self.orchestrator.config().progress_interval_secs)
            .announce(&format!("`[FOLDER - UPLOAD]`\n\n`{}`\n`Status`\n`Uploading`", name))
            .await;

        let mut summary = ReplicationSummary::empty(container.clone());
        self.mirror_entries(entries, container, 1, job, &mut summary)
            .await?;

        tracing::info!(
            job_id = %job.job_id,
            folder = %name,
            files = summary.files,
            failures = summary.failures.len(),
            "Folder upload finished"
        );
        Ok(summary)
    }

    fn mirror_entries<'a>(
        &'a self,
        entries: Vec<LocalEntry>,
        parent: String,
        depth: usize,
        job: &'a JobContext,
        summary: &'a mut ReplicationSummary,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            for entry in entries {
                job.signal.check()?;

                match &entry.kind {
                    EntryKind::File => {}
                    EntryKind::Unreadable(reason) => {
                        tracing::warn!(path = %entry.path.display(), "Skipping unreadable entry: {}", reason);
                        summary.failures.push(ItemFailure {
                            item: entry.path.display().to_string(),
                            reason: reason.clone(),
                        });
                        continue;
                    }
                    EntryKind::Dir => {
                        if depth >= self.max_depth() {
                            return Err(depth_exceeded(&entry.name, self.max_depth()));
                        }
                        let children = match read_sorted_entries(&entry.path).await {
                            Ok(children) => children,
                            Err(e) => {
                                tracing::warn!(dir = %entry.path.display(), "Could not read folder, continuing: {}", e);
                                summary.failures.push(ItemFailure {
                                    item: entry.path.display().to_string(),
                                    reason: e.to_string(),
                                });
                                continue;
                            }
                        };
                        let child_id = self.ensure_container(&entry.name, Some(&parent)).await?;
                        self.mirror_entries(children, child_id, depth + 1, job, summary)
                            .await?;
                        continue;
                    }
                }

                match self.orchestrator.upload(&entry.path, Some(&parent), job).await {
                    Ok(outcome) => {
                        summary.files += 1;
                        summary.bytes += outcome.bytes_transferred;
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        tracing::warn!(file = %entry.path.display(), "Upload failed, continuing: {}", e);
                        summary.failures.push(ItemFailure {
                            item: entry.path.display().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Ok(())
        })
    }

    // ========================================================================
    // REMOTE -> REMOTE
    // ========================================================================

    /// Copy the tree under `source` into `destination` as a container of the same name.
    pub async fn copy_remote_directory(
        &self,
        source: &RemoteObjectRef,
        destination: Option<&str>,
        job: &JobContext,
    ) -> Result<ReplicationSummary, DriveError> {
        job.signal.check()?;

        let children = self.list_all_children(&source.id, &job.signal).await?;
        if children.is_empty() {
            tracing::info!(folder = %source.name, "Nothing to copy in empty folder");
            return Ok(ReplicationSummary::empty(
                destination.unwrap_or(DRIVE_ROOT_ALIAS),
            ));
        }

        let container = self.ensure_container(&source.name, destination).await?;
        self.share_top_level(&container, &source.name).await;
        ProgressReporter::new(job.status.clone(), self.orchestrator.config().progress_interval_secs)
            .announce(&format!("`[FOLDER - COPY]`\n\n`{}`\n`Status`\n`Copying`", source.name))
            .await;

        let mut summary = ReplicationSummary::empty(container.clone());
        self.copy_entries(children, container, 1, job, &mut summary)
            .await?;

        tracing::info!(
            job_id = %job.job_id,
            folder = %source.name,
            files = summary.files,
            failures = summary.failures.len(),
            "Folder copy finished"
        );
        Ok(summary)
    }

    fn copy_entries<'a>(
        &'a self,
        children: Vec<RemoteObjectRef>,
        parent: String,
        depth: usize,
        job: &'a JobContext,
        summary: &'a mut ReplicationSummary,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            for child in children {
                job.signal.check()?;

                if child.is_container {
                    if depth >= self.max_depth() {
                        return Err(depth_exceeded(&child.name, self.max_depth()));
                    }
                    let grandchildren = self.list_all_children(&child.id, &job.signal).await?;
                    let child_id = self.ensure_container(&child.name, Some(&parent)).await?;
                    self.copy_entries(grandchildren, child_id, depth + 1, job, summary)
                        .await?;
                    continue;
                }

                match self.orchestrator.copy(&child, Some(&parent), job).await {
                    Ok(copied) => {
                        summary.files += 1;
                        summary.bytes += copied.size_bytes.unwrap_or(0);
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        tracing::warn!(file = %child.name, "Copy failed, continuing: {}", e);
                        summary.failures.push(ItemFailure {
                            item: child.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }

                job.signal
                    .sleep(self.orchestrator.config().copy_pause)
                    .await?;
            }
            Ok(())
        })
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Total bytes of every leaf under `container_id`. Unknown sizes count as zero.
    pub async fn count_size(
        &self,
        container_id: &str,
        signal: &CancellationSignal,
    ) -> Result<u64, DriveError> {
        self.count_size_at(container_id.to_string(), 0, signal).await
    }

    fn count_size_at<'a>(
        &'a self,
        container_id: String,
        depth: usize,
        signal: &'a CancellationSignal,
    ) -> SizeFuture<'a> {
        Box::pin(async move {
            if depth > self.max_depth() {
                return Err(depth_exceeded(&container_id, self.max_depth()));
            }
            let mut total = 0u64;
            for child in self.list_all_children(&container_id, signal).await? {
                if child.is_container {
                    total += self.count_size_at(child.id, depth + 1, signal).await?;
                } else {
                    total += child.size_bytes.unwrap_or(0);
                }
            }
            Ok(total)
        })
    }

    /// Every direct child of `container_id`, following pagination.
    pub async fn list_all_children(
        &self,
        container_id: &str,
        signal: &CancellationSignal,
    ) -> Result<Vec<RemoteObjectRef>, DriveError> {
        let query = ListQuery::children_of(container_id);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            signal.check()?;
            let page = self
                .drive()
                .list_children(&query, page_token.as_deref())
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }

    /// Create a container, or reuse a same-named one when configured to.
    async fn ensure_container(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, DriveError> {
        if self.orchestrator.config().reuse_existing_folders {
            let query = ListQuery {
                parent_id: Some(parent.unwrap_or(DRIVE_ROOT_ALIAS).to_string()),
                exact_name: Some(name.to_string()),
                containers_only: true,
                page_size: 1,
                ..Default::default()
            };
            let page = self.drive().list_children(&query, None).await?;
            if let Some(existing) = page.items.into_iter().next() {
                tracing::debug!(folder = %name, id = %existing.id, "Reusing existing folder");
                return Ok(existing.id);
            }
        }
        self.drive().create_container(name, parent).await
    }

    async fn share_top_level(&self, container_id: &str, name: &str) {
        if let Err(e) = self.drive().set_public_readable(container_id).await {
            tracing::warn!(folder = %name, "Could not share folder publicly: {}", e);
        }
    }
}

/// Errors that end a whole walk instead of a single leaf.
fn is_fatal(error: &DriveError) -> bool {
    matches!(error, DriveError::Cancelled | DriveError::Auth(_))
}

fn depth_exceeded(name: &str, max_depth: usize) -> DriveError {
    DriveError::InvalidInput(format!(
        "{} is nested deeper than {} levels",
        name, max_depth
    ))
}

/// Directory entries sorted by name, so walks are deterministic.
///
/// Symlinks are followed. An entry whose metadata cannot be read is kept
/// as `Unreadable` so the walk can report it alongside its siblings.
async fn read_sorted_entries(dir: &Path) -> Result<Vec<LocalEntry>, DriveError> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let kind = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => EntryKind::Dir,
            Ok(_) => EntryKind::File,
            Err(e) => EntryKind::Unreadable(e.to_string()),
        };
        entries.push(LocalEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            kind,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

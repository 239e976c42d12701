// Single-object transfers: upload, download, server-side copy.
//
// Every loop here checks the job's signal before each chunk and offers a
// snapshot to the job's progress reporter after each chunk.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::drive_error::DriveError;
use super::drive_models::{
    ChunkProgress, DownloadOutcome, RemoteObjectRef, TransferJob, TransferMode, UploadOutcome,
    UploadRequest,
};
use super::drive_ports::{ChunkSource, PublicShare, RemoteDrive};
use super::progress::{ProgressReporter, DEFAULT_PROGRESS_INTERVAL_SECS};
use super::session::JobContext;

/// Resumable uploads must send chunks in multiples of this.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Consecutive chunks the service may refuse to persist before we give up.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Tunables shared by the orchestrator and the replicator.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub progress_interval_secs: f64,
    /// Pause after each file of a remote-to-remote tree copy.
    pub copy_pause: Duration,
    pub max_depth: usize,
    /// How often the external download agent is polled.
    pub external_poll_interval: Duration,
    /// Where downloads land.
    pub staging_dir: PathBuf,
    /// Reuse a same-named container in the destination instead of creating a duplicate.
    pub reuse_existing_folders: bool,
    /// Optional public index that mirrors the drive root.
    pub index_url: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024 * 1024,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
            copy_pause: Duration::from_millis(500),
            max_depth: 64,
            external_poll_interval: Duration::from_secs(5),
            staging_dir: PathBuf::from("./downloads/"),
            reuse_existing_folders: false,
            index_url: None,
        }
    }
}

impl TransferConfig {
    /// Round a chunk size in MiB to the resumable-upload alignment (at least one unit).
    pub fn chunk_size_from_mb(megabytes: u64) -> usize {
        let bytes = (megabytes.max(1) as usize).saturating_mul(1024 * 1024);
        let units = (bytes / CHUNK_ALIGNMENT).max(1);
        units * CHUNK_ALIGNMENT
    }
}

// ============================================================================
// AUTHENTICATED DOWNLOAD SOURCE
// ============================================================================

/// Ranged reads through the authenticated API.
pub struct AuthenticatedSource<D: RemoteDrive> {
    drive: Arc<D>,
    id: String,
    name: String,
    total: Option<u64>,
    offset: u64,
    chunk_len: u64,
    finished: bool,
}

impl<D: RemoteDrive> AuthenticatedSource<D> {
    pub fn new(drive: Arc<D>, object: &RemoteObjectRef, chunk_len: usize) -> Self {
        Self {
            drive,
            id: object.id.clone(),
            name: object.name.clone(),
            total: object.size_bytes,
            offset: 0,
            chunk_len: chunk_len.max(1) as u64,
            finished: false,
        }
    }
}

#[async_trait]
impl<D: RemoteDrive> ChunkSource for AuthenticatedSource<D> {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        if self.finished || self.total.is_some_and(|t| self.offset >= t) {
            return Ok(None);
        }
        let chunk = self
            .drive
            .download_chunk(&self.id, self.offset, self.chunk_len)
            .await?;
        if chunk.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.offset += chunk.len() as u64;
        Ok(Some(chunk))
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct TransferOrchestrator<D: RemoteDrive, P: PublicShare> {
    drive: Arc<D>,
    share: Arc<P>,
    config: TransferConfig,
}

impl<D: RemoteDrive + 'static, P: PublicShare> TransferOrchestrator<D, P> {
    pub fn new(drive: Arc<D>, share: Arc<P>, config: TransferConfig) -> Self {
        Self {
            drive,
            share,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn drive(&self) -> &Arc<D> {
        &self.drive
    }

    fn reporter(&self, job: &JobContext) -> ProgressReporter {
        ProgressReporter::new(job.status.clone(), self.config.progress_interval_secs)
    }

    /// Resumable chunked upload of one local file into `destination`.
    ///
    /// An interrupted resumable session is left for the service to expire.
    pub async fn upload(
        &self,
        local_path: &Path,
        destination: Option<&str>,
        job: &JobContext,
    ) -> Result<UploadOutcome, DriveError> {
        job.signal.check()?;

        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_file() {
            return Err(DriveError::InvalidInput(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }
        let name = local_file_name(local_path)?;
        let total = metadata.len();
        let mime_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        tracing::info!(job_id = %job.job_id, file = %name, bytes = total, "Starting upload");

        let request = UploadRequest {
            name: name.clone(),
            mime_type,
            size_bytes: total,
            parent_id: destination.map(str::to_string),
            description: None,
        };
        let session = self
            .drive
            .start_upload(&request)
            .await
            .map_err(DriveError::into_transfer)?;

        let mut file = File::open(local_path).await?;
        let mut transfer = TransferJob::new(
            TransferMode::Upload,
            local_path.display().to_string(),
            destination.map(str::to_string),
            name.clone(),
            total,
        );
        let mut reporter = self.reporter(job);
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        let mut offset = 0u64;
        let mut stalled = 0u32;

        let object = loop {
            job.signal.check()?;

            let read = read_full(&mut file, &mut buffer).await?;
            let progress = self
                .drive
                .upload_chunk(&session, offset, &buffer[..read], total)
                .await
                .map_err(DriveError::into_transfer)?;

            match progress {
                ChunkProgress::Complete(object) => break object,
                ChunkProgress::Incomplete { received } => {
                    if read == 0 || received >= total {
                        return Err(DriveError::Transfer(format!(
                            "service expects more of {} than the file holds",
                            name
                        )));
                    }
                    if received <= offset {
                        stalled += 1;
                        if stalled >= MAX_STALLED_CHUNKS {
                            return Err(DriveError::Transfer(format!(
                                "upload of {} stalled at byte {}",
                                name, received
                            )));
                        }
                    } else {
                        stalled = 0;
                    }
                    // The service may persist only part of a chunk; resume from what it kept.
                    if received != offset + read as u64 {
                        file.seek(SeekFrom::Start(received)).await?;
                    }
                    offset = received;
                    transfer.set_transferred(received);
                    reporter.observe(&transfer.snapshot()).await;
                }
            }
        };

        transfer.set_transferred(total);
        reporter.observe(&transfer.snapshot()).await;

        if let Err(e) = self.drive.set_public_readable(&object.id).await {
            tracing::warn!(file = %name, "Uploaded but could not share publicly: {}", e);
        }

        let link = object.share_link();
        tracing::info!(job_id = %job.job_id, file = %name, id = %object.id, "Upload complete");
        Ok(UploadOutcome {
            object,
            bytes_transferred: total,
            link,
        })
    }

    /// Download one remote file into `target_dir`.
    ///
    /// A metadata lookup picks the authenticated route; objects the account
    /// cannot see fall back to the public share endpoint.
    pub async fn download(
        &self,
        remote_id: &str,
        target_dir: &Path,
        job: &JobContext,
    ) -> Result<DownloadOutcome, DriveError> {
        job.signal.check()?;

        let source: Box<dyn ChunkSource> = match self.drive.get_metadata(remote_id).await {
            Ok(object) if object.is_container => {
                return Err(DriveError::InvalidInput(format!(
                    "{} is a folder; clone it instead of downloading",
                    object.name
                )));
            }
            Ok(object) if object.size_bytes.is_none() && is_native_document(&object) => {
                return Err(DriveError::InvalidInput(format!(
                    "{} is a native document and has no downloadable bytes",
                    object.name
                )));
            }
            Ok(object) => Box::new(AuthenticatedSource::new(
                self.drive.clone(),
                &object,
                self.config.chunk_size,
            )),
            Err(e) if e.is_not_found() || e.is_forbidden() => {
                tracing::info!(id = %remote_id, "Not visible to the account, using public share: {}", e);
                self.share.open(remote_id).await?
            }
            Err(e) => return Err(e),
        };

        self.pump(source, remote_id, target_dir, job).await
    }

    /// Drain a chunk source into `target_dir`, removing the partial file on failure.
    pub async fn pump(
        &self,
        mut source: Box<dyn ChunkSource>,
        remote_id: &str,
        target_dir: &Path,
        job: &JobContext,
    ) -> Result<DownloadOutcome, DriveError> {
        tokio::fs::create_dir_all(target_dir).await?;
        let name = sanitize_file_name(source.file_name(), remote_id);
        let path = target_dir.join(&name);

        tracing::info!(job_id = %job.job_id, file = %name, "Starting download");
        match self.drain(source.as_mut(), remote_id, &name, &path, job).await {
            Ok(bytes_transferred) => {
                tracing::info!(job_id = %job.job_id, file = %name, bytes = bytes_transferred, "Download complete");
                Ok(DownloadOutcome {
                    path,
                    name,
                    bytes_transferred,
                })
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), "Failed to remove partial download: {}", cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        source: &mut dyn ChunkSource,
        remote_id: &str,
        name: &str,
        path: &Path,
        job: &JobContext,
    ) -> Result<u64, DriveError> {
        let expected = source.total_bytes();
        let exact = source.size_is_exact();
        let mut file = File::create(path).await?;
        let mut transfer = TransferJob::new(
            TransferMode::Download,
            remote_id,
            path.parent().map(|p| p.display().to_string()),
            name,
            expected.unwrap_or(0),
        );
        let mut reporter = self.reporter(job);

        loop {
            job.signal.check()?;
            let Some(chunk) = source.next_chunk().await.map_err(DriveError::into_transfer)? else {
                break;
            };
            file.write_all(&chunk).await?;
            transfer.add_transferred(chunk.len() as u64);
            match expected {
                Some(total) if exact || transfer.bytes_transferred < total => {
                    reporter.observe(&transfer.snapshot()).await;
                }
                _ => {}
            }
        }
        file.flush().await?;

        let done = transfer.bytes_transferred;
        if let Some(total) = expected.filter(|_| exact) {
            if done < total {
                return Err(DriveError::Transfer(format!(
                    "{} ended after {} of {} bytes",
                    name, done, total
                )));
            }
        }

        // Unknown or overshooting totals settle on what actually arrived.
        transfer.bytes_total = done;
        reporter.observe(&transfer.snapshot()).await;
        Ok(done)
    }

    /// Server-side copy of one file into `destination`.
    pub async fn copy(
        &self,
        source: &RemoteObjectRef,
        destination: Option<&str>,
        job: &JobContext,
    ) -> Result<RemoteObjectRef, DriveError> {
        job.signal.check()?;
        tracing::debug!(job_id = %job.job_id, file = %source.name, "Copying");

        let new_id = self
            .drive
            .copy_object(&source.id, destination)
            .await
            .map_err(DriveError::into_transfer)?;

        // Server-side copies are atomic, so the only snapshot is the finished one.
        let mut transfer = TransferJob::new(
            TransferMode::Copy,
            &source.id,
            destination.map(str::to_string),
            &source.name,
            source.size_bytes.unwrap_or(0),
        );
        transfer.set_transferred(transfer.bytes_total);
        self.reporter(job).observe(&transfer.snapshot()).await;

        Ok(RemoteObjectRef {
            id: new_id,
            name: source.name.clone(),
            is_container: false,
            size_bytes: source.size_bytes,
            parent_id: destination.map(str::to_string),
            mime_type: source.mime_type.clone(),
            web_view_link: None,
            web_content_link: None,
            description: source.description.clone(),
        })
    }
}

/// Fill `buffer` from `file`, stopping early only at end of file.
async fn read_full(file: &mut File, buffer: &mut [u8]) -> Result<usize, DriveError> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn local_file_name(path: &Path) -> Result<String, DriveError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DriveError::InvalidInput(format!("{} has no file name", path.display())))
}

fn is_native_document(object: &RemoteObjectRef) -> bool {
    object.mime_type.starts_with("application/vnd.google-apps.")
}

/// Make a remote name safe to use as a local file name.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

// Ports the transfer core depends on.
//
// The core defines what it needs from the outside world; `infra/` provides the
// Google Drive, public-share and aria2 implementations, and `discord/` provides
// the status channel.

use async_trait::async_trait;
use std::path::Path;

use super::drive_error::DriveError;
use super::drive_models::{
    ChunkProgress, ExternalJobStatus, ListPage, ListQuery, RemoteObjectRef, UploadRequest,
    UploadSession,
};

/// Authenticated access to the remote storage service.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    async fn list_children(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ListPage, DriveError>;

    async fn get_metadata(&self, id: &str) -> Result<RemoteObjectRef, DriveError>;

    /// Create a container and return its id. `None` parent means the drive root.
    async fn create_container(&self, name: &str, parent_id: Option<&str>)
        -> Result<String, DriveError>;

    /// Permanent delete, skipping the trash.
    async fn delete_object(&self, id: &str) -> Result<(), DriveError>;

    /// Server-side copy of a file into `parent_id`. Returns the new id.
    async fn copy_object(&self, id: &str, parent_id: Option<&str>) -> Result<String, DriveError>;

    async fn start_upload(&self, request: &UploadRequest) -> Result<UploadSession, DriveError>;

    /// Send `bytes` starting at `offset` of a `total`-byte upload.
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: &[u8],
        total: u64,
    ) -> Result<ChunkProgress, DriveError>;

    /// Read up to `len` bytes at `offset`. An empty result means end of object.
    async fn download_chunk(&self, id: &str, offset: u64, len: u64)
        -> Result<Vec<u8>, DriveError>;

    /// Grant "anyone with the link can read".
    async fn set_public_readable(&self, id: &str) -> Result<(), DriveError>;
}

/// A stream of bytes for one file, regardless of where it comes from.
#[async_trait]
pub trait ChunkSource: Send {
    fn file_name(&self) -> &str;

    /// Total size when the source knows it up front.
    fn total_bytes(&self) -> Option<u64>;

    /// False when `total_bytes` is only an estimate, such as a rounded size label.
    fn size_is_exact(&self) -> bool {
        true
    }

    /// Next chunk, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError>;
}

/// Unauthenticated download through the public sharing endpoint.
#[async_trait]
pub trait PublicShare: Send + Sync {
    async fn open(&self, file_id: &str) -> Result<Box<dyn ChunkSource>, DriveError>;
}

/// Opaque external download agent (aria2 in production).
#[async_trait]
pub trait ExternalDownloader: Send + Sync {
    /// Queue a URL or magnet link; returns the agent's job id.
    async fn add_uri(&self, uri: &str, target_dir: &Path) -> Result<String, DriveError>;

    async fn add_torrent(&self, torrent: &Path, target_dir: &Path) -> Result<String, DriveError>;

    async fn poll_status(&self, job_id: &str) -> Result<ExternalJobStatus, DriveError>;

    /// Stop one job and forget its result.
    async fn discard(&self, job_id: &str) -> Result<(), DriveError>;

    /// Drop every queued and active job.
    async fn cancel_all(&self) -> Result<(), DriveError>;
}

/// A replace-in-place text message used for progress.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn update(&self, text: &str) -> Result<(), DriveError>;
}

// Domain models for the Drive transfer core.
//
// These types know nothing about HTTP or Discord. The infra layer maps API
// payloads into them and the Discord layer renders them.

use std::path::PathBuf;
use tokio::time::Instant;
use uuid::Uuid;

use super::progress::ProgressSnapshot;

/// MIME type Google Drive uses to mark folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

// ============================================================================
// REMOTE OBJECTS
// ============================================================================

/// A file or container as reported by the remote service.
///
/// Produced by listing or inspecting; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectRef {
    pub id: String,
    pub name: String,
    pub is_container: bool,
    /// Native Google documents have no byte size.
    pub size_bytes: Option<u64>,
    pub parent_id: Option<String>,
    pub mime_type: String,
    pub web_view_link: Option<String>,
    pub web_content_link: Option<String>,
    pub description: Option<String>,
}

impl RemoteObjectRef {
    /// Best link to hand to a user: direct download for files, the folder view for containers.
    pub fn share_link(&self) -> String {
        let preferred = if self.is_container {
            self.web_view_link.as_ref()
        } else {
            self.web_content_link
                .as_ref()
                .or(self.web_view_link.as_ref())
        };

        match preferred {
            Some(link) => link.clone(),
            None if self.is_container => {
                format!("https://drive.google.com/drive/folders/{}", self.id)
            }
            None => format!("https://drive.google.com/uc?id={}&export=download", self.id),
        }
    }
}

/// Sort order for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    /// Folders first, then by name. Used when walking trees.
    #[default]
    FoldersThenName,
    /// Most recently modified first. Used for user searches.
    RecentlyModified,
}

/// Filter for one `list_children` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub parent_id: Option<String>,
    pub name_contains: Option<String>,
    pub exact_name: Option<String>,
    pub containers_only: bool,
    pub page_size: u32,
    pub order: ListOrder,
}

impl ListQuery {
    /// All direct children of a container, in tree-walk order.
    pub fn children_of(container_id: &str) -> Self {
        Self {
            parent_id: Some(container_id.to_string()),
            page_size: 100,
            ..Default::default()
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<RemoteObjectRef>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// UPLOADS
// ============================================================================

/// Metadata sent when opening a resumable upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub parent_id: Option<String>,
    pub description: Option<String>,
}

/// Handle for an open resumable upload (the session URI for Google Drive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uri: String,
}

/// What the service says after receiving a chunk.
#[derive(Debug, Clone)]
pub enum ChunkProgress {
    /// More bytes are expected; `received` is how many the service has persisted.
    Incomplete { received: u64 },
    /// The object is complete.
    Complete(RemoteObjectRef),
}

// ============================================================================
// TRANSFER JOBS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Upload,
    Download,
    Copy,
}

impl TransferMode {
    /// Tag shown at the top of status messages, e.g. `[FILE - UPLOAD]`.
    pub fn label(&self) -> &'static str {
        match self {
            TransferMode::Upload => "[FILE - UPLOAD]",
            TransferMode::Download => "[FILE - DOWNLOAD]",
            TransferMode::Copy => "[FILE - COPY]",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            TransferMode::Upload => "Uploading",
            TransferMode::Download => "Downloading",
            TransferMode::Copy => "Copying",
        }
    }
}

/// A single transfer in flight. Mutated once per chunk and dropped at the end.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub job_id: Uuid,
    pub source: String,
    pub destination: Option<String>,
    pub mode: TransferMode,
    pub file_name: String,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
    pub started_at: Instant,
}

impl TransferJob {
    pub fn new(
        mode: TransferMode,
        source: impl Into<String>,
        destination: Option<String>,
        file_name: impl Into<String>,
        bytes_total: u64,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source: source.into(),
            destination,
            mode,
            file_name: file_name.into(),
            bytes_total,
            bytes_transferred: 0,
            started_at: Instant::now(),
        }
    }

    /// Record the absolute number of bytes the remote side has acknowledged.
    pub fn set_transferred(&mut self, bytes: u64) {
        self.bytes_transferred = bytes;
    }

    pub fn add_transferred(&mut self, bytes: u64) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_done: self.bytes_transferred,
            bytes_total: self.bytes_total,
            elapsed_seconds: self.started_at.elapsed().as_secs_f64(),
            label: self.mode.label().to_string(),
            verb: self.mode.verb().to_string(),
            file_name: self.file_name.clone(),
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub object: RemoteObjectRef,
    pub bytes_transferred: u64,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub name: String,
    pub bytes_transferred: u64,
}

/// A leaf that failed inside a directory walk. Siblings keep going.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ReplicationSummary {
    /// The top-level container created for the tree, or the untouched
    /// destination when the source was empty.
    pub container_id: String,
    pub files: u64,
    pub bytes: u64,
    pub failures: Vec<ItemFailure>,
}

impl ReplicationSummary {
    pub fn empty(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            files: 0,
            bytes: 0,
            failures: Vec::new(),
        }
    }
}

// ============================================================================
// EXTERNAL DOWNLOAD AGENT
// ============================================================================

/// Something the external download agent can fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSource {
    /// http(s)/ftp URL or magnet link.
    Uri(String),
    /// A `.torrent` file on local disk.
    TorrentFile(PathBuf),
}

/// Snapshot of an agent job, as polled.
#[derive(Debug, Clone, Default)]
pub struct ExternalJobStatus {
    pub complete: bool,
    pub name: String,
    pub progress_percent: f64,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    /// Bytes per second.
    pub speed: u64,
    pub eta_seconds: Option<u64>,
    pub error_message: Option<String>,
    /// Jobs spawned by this one (a magnet link resolves into the real torrent job).
    pub followed_by: Vec<String>,
}

// ============================================================================
// BATCHES
// ============================================================================

/// What a finished item produced, for the final report.
#[derive(Debug, Clone)]
pub enum TransferSummary {
    Uploaded(UploadOutcome),
    UploadedFolder {
        name: String,
        link: String,
        summary: ReplicationSummary,
        size_bytes: u64,
    },
    Downloaded(DownloadOutcome),
    Copied {
        object: RemoteObjectRef,
        size_bytes: u64,
    },
}

#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Completed(Box<TransferSummary>),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub locator: String,
    pub outcome: ItemOutcome,
}

/// Per-item results of one invocation with several locators.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn push(&mut self, locator: impl Into<String>, outcome: ItemOutcome) {
        self.items.push(BatchItem {
            locator: locator.into(),
            outcome,
        });
    }

    pub fn successes(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Completed(_)))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.items
            .iter()
            .any(|i| matches!(i.outcome, ItemOutcome::Cancelled))
    }
}

/// Result of `mkdir` for one name.
#[derive(Debug, Clone)]
pub enum FolderOutcome {
    Created(RemoteObjectRef),
    Existing(RemoteObjectRef),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(is_container: bool) -> RemoteObjectRef {
        RemoteObjectRef {
            id: "abc-1".to_string(),
            name: "thing".to_string(),
            is_container,
            size_bytes: None,
            parent_id: None,
            mime_type: String::new(),
            web_view_link: None,
            web_content_link: None,
            description: None,
        }
    }

    #[test]
    fn share_link_falls_back_to_canonical_urls() {
        assert_eq!(
            object(true).share_link(),
            "https://drive.google.com/drive/folders/abc-1"
        );
        assert_eq!(
            object(false).share_link(),
            "https://drive.google.com/uc?id=abc-1&export=download"
        );
    }

    #[test]
    fn share_link_prefers_content_link_for_files() {
        let mut file = object(false);
        file.web_view_link = Some("view".to_string());
        file.web_content_link = Some("content".to_string());
        assert_eq!(file.share_link(), "content");

        let mut folder = object(true);
        folder.web_view_link = Some("view".to_string());
        folder.web_content_link = Some("content".to_string());
        assert_eq!(folder.share_link(), "view");
    }

    #[test]
    fn batch_report_counts_outcomes() {
        let mut report = BatchReport::default();
        report.push("a", ItemOutcome::Failed("boom".into()));
        report.push("b", ItemOutcome::Cancelled);
        assert_eq!(report.failures(), 1);
        assert_eq!(report.successes(), 0);
        assert!(report.was_cancelled());
    }
}

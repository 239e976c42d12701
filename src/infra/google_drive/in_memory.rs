// In-memory implementations of `RemoteDrive` and `PublicShare`.
//
// Objects live in a DashMap keyed by id. Every port call is counted and
// logged so tests can assert on exactly what the core asked for, and a few
// knobs inject failures, partial chunk persistence and cancellation.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::core::drive::drive_models::{
    ChunkProgress, ListOrder, ListPage, ListQuery, RemoteObjectRef, UploadRequest, UploadSession,
    FOLDER_MIME_TYPE,
};
use crate::core::drive::replicator::DRIVE_ROOT_ALIAS;
use crate::core::drive::{CancellationSignal, ChunkSource, DriveError, PublicShare, RemoteDrive};

#[derive(Clone)]
struct StoredObject {
    meta: RemoteObjectRef,
    content: Vec<u8>,
    /// Insertion order, standing in for modification time.
    seq: u64,
}

struct PendingUpload {
    request: UploadRequest,
    received: Vec<u8>,
}

/// Trigger a signal once a counter reaches zero.
struct CancelTrigger {
    signal: CancellationSignal,
    remaining: u64,
}

impl CancelTrigger {
    fn tick(slot: &Mutex<Option<CancelTrigger>>) {
        let mut guard = slot.lock().unwrap();
        if let Some(trigger) = guard.as_mut() {
            trigger.remaining = trigger.remaining.saturating_sub(1);
            if trigger.remaining == 0 {
                trigger.signal.trigger();
                *guard = None;
            }
        }
    }
}

pub struct InMemoryDrive {
    objects: DashMap<String, StoredObject>,
    uploads: DashMap<String, PendingUpload>,
    public: DashSet<String>,
    forbidden: DashSet<String>,
    failing_names: DashSet<String>,
    next_id: AtomicU64,
    calls: DashMap<&'static str, u64>,
    log: Mutex<Vec<String>>,
    persist_limit: Mutex<Option<usize>>,
    cancel_on_chunk: Mutex<Option<CancelTrigger>>,
    cancel_on_file: Mutex<Option<CancelTrigger>>,
}

impl Default for InMemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDrive {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            uploads: DashMap::new(),
            public: DashSet::new(),
            forbidden: DashSet::new(),
            failing_names: DashSet::new(),
            next_id: AtomicU64::new(1),
            calls: DashMap::new(),
            log: Mutex::new(Vec::new()),
            persist_limit: Mutex::new(None),
            cancel_on_chunk: Mutex::new(None),
            cancel_on_file: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    fn store(
        &self,
        name: &str,
        parent: Option<&str>,
        mime_type: &str,
        content: Vec<u8>,
        size: Option<u64>,
    ) -> RemoteObjectRef {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let meta = RemoteObjectRef {
            id: format!("obj-{}", seq),
            name: name.to_string(),
            is_container: mime_type == FOLDER_MIME_TYPE,
            size_bytes: size,
            parent_id: normalize_parent(parent),
            mime_type: mime_type.to_string(),
            web_view_link: None,
            web_content_link: None,
            description: None,
        };
        self.objects.insert(
            meta.id.clone(),
            StoredObject {
                meta: meta.clone(),
                content,
                seq,
            },
        );
        meta
    }

    pub fn insert_folder(&self, name: &str, parent: Option<&str>) -> String {
        self.store(name, parent, FOLDER_MIME_TYPE, Vec::new(), None).id
    }

    pub fn insert_file(&self, name: &str, parent: Option<&str>, content: &[u8]) -> String {
        self.store(
            name,
            parent,
            "application/octet-stream",
            content.to_vec(),
            Some(content.len() as u64),
        )
        .id
    }

    /// A Google-native document: no byte size.
    pub fn insert_native_document(&self, name: &str, parent: Option<&str>) -> String {
        self.store(name, parent, "application/vnd.google-apps.document", Vec::new(), None)
            .id
    }

    // ------------------------------------------------------------------
    // Knobs
    // ------------------------------------------------------------------

    /// Uploads and copies of objects with this name fail with a 500.
    pub fn fail_uploads_named(&self, name: &str) {
        self.failing_names.insert(name.to_string());
    }

    /// Metadata and content reads of `id` fail with a 403.
    pub fn forbid(&self, id: &str) {
        self.forbidden.insert(id.to_string());
    }

    /// Persist at most `bytes` of every uploaded chunk.
    pub fn persist_at_most(&self, bytes: usize) {
        *self.persist_limit.lock().unwrap() = Some(bytes.max(1));
    }

    /// Trigger `signal` after `chunks` upload or download chunk calls.
    pub fn cancel_after_chunks(&self, signal: CancellationSignal, chunks: u64) {
        *self.cancel_on_chunk.lock().unwrap() = Some(CancelTrigger {
            signal,
            remaining: chunks,
        });
    }

    /// Trigger `signal` after `files` completed uploads or copies.
    pub fn cancel_after_files(&self, signal: CancellationSignal, files: u64) {
        *self.cancel_on_file.lock().unwrap() = Some(CancelTrigger {
            signal,
            remaining: files,
        });
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.objects.get(id).map(|o| o.content.clone())
    }

    pub fn is_public(&self, id: &str) -> bool {
        self.public.contains(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<RemoteObjectRef> {
        self.objects
            .iter()
            .filter(|o| o.meta.name == name)
            .min_by_key(|o| o.seq)
            .map(|o| o.meta.clone())
    }

    /// Direct children sorted by name. `None` lists the drive root.
    pub fn children(&self, parent: Option<&str>) -> Vec<RemoteObjectRef> {
        let parent = normalize_parent(parent);
        let mut items: Vec<RemoteObjectRef> = self
            .objects
            .iter()
            .filter(|o| o.meta.parent_id == parent)
            .map(|o| o.meta.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub fn calls(&self, op: &str) -> u64 {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Log lines (`"<op> <name>"`) for the given operations, in call order.
    pub fn log_of(&self, ops: &[&str]) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|line| ops.iter().any(|op| line.split(' ').next() == Some(*op)))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record(&self, op: &'static str, subject: &str) {
        *self.calls.entry(op).or_insert(0) += 1;
        self.log.lock().unwrap().push(format!("{} {}", op, subject));
    }

    fn lookup(&self, id: &str) -> Result<StoredObject, DriveError> {
        if self.forbidden.contains(id) {
            return Err(DriveError::remote(403, "The user does not have sufficient permissions"));
        }
        self.objects
            .get(id)
            .map(|o| o.clone())
            .ok_or_else(|| DriveError::remote(404, format!("File not found: {}", id)))
    }

    fn file_completed(&self, name: &str) {
        self.record("complete_upload", name);
        CancelTrigger::tick(&self.cancel_on_file);
    }

    fn remove_tree(&self, id: &str) {
        let children: Vec<String> = self
            .objects
            .iter()
            .filter(|o| o.meta.parent_id.as_deref() == Some(id))
            .map(|o| o.meta.id.clone())
            .collect();
        for child in children {
            self.remove_tree(&child);
        }
        self.objects.remove(id);
    }
}

fn normalize_parent(parent: Option<&str>) -> Option<String> {
    parent
        .filter(|p| *p != DRIVE_ROOT_ALIAS)
        .map(str::to_string)
}

#[async_trait]
impl RemoteDrive for InMemoryDrive {
    async fn list_children(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ListPage, DriveError> {
        self.record("list_children", query.parent_id.as_deref().unwrap_or("*"));

        let parent_filter = query.parent_id.as_deref().map(|p| normalize_parent(Some(p)));
        let mut matches: Vec<StoredObject> = self
            .objects
            .iter()
            .filter(|o| match &parent_filter {
                Some(parent) => &o.meta.parent_id == parent,
                None => true,
            })
            .filter(|o| {
                query
                    .name_contains
                    .as_ref()
                    .map_or(true, |n| o.meta.name.contains(n.as_str()))
            })
            .filter(|o| query.exact_name.as_ref().map_or(true, |n| &o.meta.name == n))
            .filter(|o| !query.containers_only || o.meta.is_container)
            .map(|o| o.clone())
            .collect();

        match query.order {
            ListOrder::FoldersThenName => matches.sort_by(|a, b| {
                b.meta
                    .is_container
                    .cmp(&a.meta.is_container)
                    .then_with(|| a.meta.name.cmp(&b.meta.name))
            }),
            ListOrder::RecentlyModified => matches.sort_by(|a, b| b.seq.cmp(&a.seq)),
        }

        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let page_size = query.page_size.max(1) as usize;
        let end = (start + page_size).min(matches.len());
        let items = matches
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|o| o.meta.clone())
            .collect();
        let next_page_token = (end < matches.len()).then(|| end.to_string());

        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn get_metadata(&self, id: &str) -> Result<RemoteObjectRef, DriveError> {
        self.record("get_metadata", id);
        self.lookup(id).map(|o| o.meta)
    }

    async fn create_container(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, DriveError> {
        self.record("create_container", name);
        if let Some(parent) = normalize_parent(parent_id) {
            self.lookup(&parent)?;
        }
        Ok(self.insert_folder(name, parent_id))
    }

    async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        self.record("delete_object", id);
        self.lookup(id)?;
        self.remove_tree(id);
        Ok(())
    }

    async fn copy_object(&self, id: &str, parent_id: Option<&str>) -> Result<String, DriveError> {
        self.record("copy_object", id);
        let source = self.lookup(id)?;
        if self.failing_names.contains(&source.meta.name) {
            return Err(DriveError::remote(500, "Backend error"));
        }
        let copy = self.store(
            &source.meta.name,
            parent_id,
            &source.meta.mime_type,
            source.content.clone(),
            source.meta.size_bytes,
        );
        self.file_completed(&source.meta.name);
        Ok(copy.id)
    }

    async fn start_upload(&self, request: &UploadRequest) -> Result<UploadSession, DriveError> {
        self.record("start_upload", &request.name);
        if self.failing_names.contains(&request.name) {
            return Err(DriveError::remote(500, "Backend error"));
        }
        let uri = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.insert(
            uri.clone(),
            PendingUpload {
                request: request.clone(),
                received: Vec::new(),
            },
        );
        Ok(UploadSession { uri })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: &[u8],
        total: u64,
    ) -> Result<ChunkProgress, DriveError> {
        self.record("upload_chunk", &session.uri);
        CancelTrigger::tick(&self.cancel_on_chunk);

        let limit = *self.persist_limit.lock().unwrap();
        let (request, content) = {
            let mut pending = self
                .uploads
                .get_mut(&session.uri)
                .ok_or_else(|| DriveError::remote(404, "Upload session expired"))?;
            if pending.received.len() as u64 != offset {
                return Err(DriveError::remote(400, "Chunk does not start at the persisted offset"));
            }
            let keep = limit.map_or(bytes.len(), |l| l.min(bytes.len()));
            pending.received.extend_from_slice(&bytes[..keep]);
            let received = pending.received.len() as u64;
            if received < total {
                return Ok(ChunkProgress::Incomplete { received });
            }
            (pending.request.clone(), pending.received.clone())
        };

        self.uploads.remove(&session.uri);
        let object = self.store(
            &request.name,
            request.parent_id.as_deref(),
            &request.mime_type,
            content,
            Some(total),
        );
        self.file_completed(&request.name);
        Ok(ChunkProgress::Complete(object))
    }

    async fn download_chunk(&self, id: &str, offset: u64, len: u64) -> Result<Vec<u8>, DriveError> {
        self.record("download_chunk", id);
        CancelTrigger::tick(&self.cancel_on_chunk);
        let object = self.lookup(id)?;
        let start = (offset as usize).min(object.content.len());
        let end = (start + len as usize).min(object.content.len());
        Ok(object.content[start..end].to_vec())
    }

    async fn set_public_readable(&self, id: &str) -> Result<(), DriveError> {
        self.record("set_public_readable", id);
        self.lookup(id)?;
        self.public.insert(id.to_string());
        Ok(())
    }
}

// =============================================================================
// PUBLIC SHARE
// =============================================================================

struct MemorySource {
    name: String,
    total: Option<u64>,
    exact: bool,
    chunks: VecDeque<Vec<u8>>,
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    fn size_is_exact(&self) -> bool {
        self.exact
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DriveError> {
        Ok(self.chunks.pop_front())
    }
}

#[derive(Default)]
pub struct InMemoryShare {
    files: DashMap<String, (String, Vec<u8>, Option<u64>, bool)>,
}

impl InMemoryShare {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `content` under `id`. `claimed_total` is what the share reports as the size.
    pub fn insert(&self, id: &str, name: &str, content: &[u8], claimed_total: Option<u64>) {
        self.files.insert(
            id.to_string(),
            (name.to_string(), content.to_vec(), claimed_total, true),
        );
    }

    /// Publish `content` with a size that is only an estimate.
    pub fn insert_estimated(&self, id: &str, name: &str, content: &[u8], estimate: u64) {
        self.files.insert(
            id.to_string(),
            (name.to_string(), content.to_vec(), Some(estimate), false),
        );
    }
}

#[async_trait]
impl PublicShare for InMemoryShare {
    async fn open(&self, file_id: &str) -> Result<Box<dyn ChunkSource>, DriveError> {
        let entry = self
            .files
            .get(file_id)
            .ok_or_else(|| DriveError::remote(404, format!("File not found: {}", file_id)))?;
        let (name, content, total, exact) = entry.value().clone();
        Ok(Box::new(MemorySource {
            name,
            total,
            exact,
            chunks: content.chunks(3).map(<[u8]>::to_vec).collect(),
        }))
    }
}

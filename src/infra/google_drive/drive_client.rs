// =============================================================================
// GOOGLE DRIVE REST v3 CLIENT
// =============================================================================
//
// Implements the `RemoteDrive` port over the Drive v3 REST API.
//
// **Uploads** use the resumable protocol: one POST opens a session (the
// `Location` header is the session URI), then each chunk is PUT with a
// `Content-Range` header. A `308` answer means "keep going" and carries a
// `Range` header with what the service has persisted so far.
//
// **Downloads** are ranged `alt=media` GETs, one chunk per request.
//
// Every call sets `supportsAllDrives` so shared drives work the same as
// "My Drive".

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::auth::AccessTokenProvider;
use crate::core::drive::drive_models::{
    ChunkProgress, ListOrder, ListPage, ListQuery, RemoteObjectRef, UploadRequest, UploadSession,
    FOLDER_MIME_TYPE,
};
use crate::core::drive::{DriveError, RemoteDrive};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FILE_FIELDS: &str = "id, name, mimeType, size, parents, webViewLink, webContentLink, description";

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    /// Int64 values come back as JSON strings.
    size: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    web_view_link: Option<String>,
    web_content_link: Option<String>,
    description: Option<String>,
}

impl From<DriveFile> for RemoteObjectRef {
    fn from(file: DriveFile) -> Self {
        RemoteObjectRef {
            is_container: file.mime_type == FOLDER_MIME_TYPE,
            size_bytes: file.size.and_then(|s| s.parse().ok()),
            parent_id: file.parents.into_iter().next(),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            web_view_link: file.web_view_link,
            web_content_link: file.web_content_link,
            description: file.description,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct GoogleDriveClient {
    client: Client,
    auth: Arc<dyn AccessTokenProvider>,
    api_base: String,
    upload_base: String,
}

impl GoogleDriveClient {
    pub fn new(auth: Arc<dyn AccessTokenProvider>) -> Self {
        Self::with_base_urls(auth, DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE)
    }

    /// Point the client somewhere other than googleapis.com (used by tests).
    pub fn with_base_urls(
        auth: Arc<dyn AccessTokenProvider>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        // 308 means "resume incomplete" to the upload protocol, never a redirect.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            auth,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn bearer(&self) -> Result<String, DriveError> {
        self.auth.access_token().await
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(id))
    }
}

/// Build the `q` expression for a listing.
fn build_query(query: &ListQuery) -> String {
    let mut clauses = Vec::new();
    if let Some(parent) = &query.parent_id {
        clauses.push(format!("'{}' in parents", escape_literal(parent)));
    }
    if let Some(name) = &query.name_contains {
        clauses.push(format!("name contains '{}'", escape_literal(name)));
    }
    if let Some(name) = &query.exact_name {
        clauses.push(format!("name = '{}'", escape_literal(name)));
    }
    if query.containers_only {
        clauses.push(format!("mimeType = '{}'", FOLDER_MIME_TYPE));
    }
    clauses.push("trashed = false".to_string());
    clauses.join(" and ")
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn order_by(order: ListOrder) -> &'static str {
    match order {
        ListOrder::FoldersThenName => "folder, name",
        ListOrder::RecentlyModified => "modifiedTime desc, folder",
    }
}

fn network(e: reqwest::Error) -> DriveError {
    DriveError::Transfer(format!("Request failed: {}", e))
}

/// Turn a non-2xx response into a `DriveError` carrying the API's own message.
async fn api_error(response: Response) -> DriveError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    if status == StatusCode::UNAUTHORIZED {
        DriveError::Auth(reason)
    } else {
        DriveError::remote(status.as_u16(), reason)
    }
}

async fn ensure_success(response: Response) -> Result<Response, DriveError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error(response).await)
    }
}

/// Permission failures the service reports for items it will not share per file.
fn is_tolerated_permission_error(error: &DriveError, id: &str) -> bool {
    match error {
        DriveError::RemoteService { reason, .. } => {
            reason.contains(&format!("File not found: {}", id))
                || reason.contains("Sharing folders that are inside a shared drive is not supported")
        }
        _ => false,
    }
}

/// Parse `Range: bytes=0-1234` into the number of persisted bytes.
fn persisted_bytes(range: Option<&header::HeaderValue>) -> u64 {
    range
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('-').next())
        .and_then(|end| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

#[async_trait]
impl RemoteDrive for GoogleDriveClient {
    async fn list_children(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ListPage, DriveError> {
        let q = build_query(query);
        let fields = format!("nextPageToken, files({})", FILE_FIELDS);
        let page_size = query.page_size.clamp(1, 1000).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("q", q.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", page_size.as_str()),
            ("orderBy", order_by(query.order)),
            ("spaces", "drive"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        tracing::debug!(q = %q, "Listing drive files");
        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(self.bearer().await?)
            .query(&params)
            .send()
            .await
            .map_err(network)?;

        let list: FileList = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(network)?;
        Ok(ListPage {
            items: list.files.into_iter().map(RemoteObjectRef::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn get_metadata(&self, id: &str) -> Result<RemoteObjectRef, DriveError> {
        tracing::debug!(id, "Fetching metadata");
        let response = self
            .client
            .get(self.file_url(id))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(network)?;

        let file: DriveFile = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(network)?;
        Ok(file.into())
    }

    async fn create_container(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, DriveError> {
        let mut body = json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        if let Some(parent) = parent_id {
            body["parents"] = json!([parent]);
        }

        tracing::debug!(folder = name, parent = ?parent_id, "Creating folder");
        let response = self
            .client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        let created: CreatedFile = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(network)?;
        Ok(created.id)
    }

    async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        tracing::debug!(id, "Deleting");
        let response = self
            .client
            .delete(self.file_url(id))
            .bearer_auth(self.bearer().await?)
            .query(&[("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn copy_object(&self, id: &str, parent_id: Option<&str>) -> Result<String, DriveError> {
        let body = match parent_id {
            Some(parent) => json!({ "parents": [parent] }),
            None => json!({}),
        };

        tracing::debug!(id, parent = ?parent_id, "Copying");
        let response = self
            .client
            .post(format!("{}/copy", self.file_url(id)))
            .bearer_auth(self.bearer().await?)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        let created: CreatedFile = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(network)?;
        Ok(created.id)
    }

    async fn start_upload(&self, request: &UploadRequest) -> Result<UploadSession, DriveError> {
        let mut body = json!({ "name": request.name, "mimeType": request.mime_type });
        if let Some(parent) = &request.parent_id {
            body["parents"] = json!([parent]);
        }
        if let Some(description) = &request.description {
            body["description"] = json!(description);
        }

        tracing::debug!(file = %request.name, bytes = request.size_bytes, "Opening resumable upload");
        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(self.bearer().await?)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", FILE_FIELDS),
            ])
            .header("X-Upload-Content-Type", &request.mime_type)
            .header("X-Upload-Content-Length", request.size_bytes.to_string())
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        let response = ensure_success(response).await?;
        let uri = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::Transfer("upload session has no Location header".to_string()))?;
        Ok(UploadSession {
            uri: uri.to_string(),
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        bytes: &[u8],
        total: u64,
    ) -> Result<ChunkProgress, DriveError> {
        let content_range = if bytes.is_empty() {
            format!("bytes */{}", total)
        } else {
            format!("bytes {}-{}/{}", offset, offset + bytes.len() as u64 - 1, total)
        };

        let response = self
            .client
            .put(&session.uri)
            .bearer_auth(self.bearer().await?)
            .header(header::CONTENT_RANGE, content_range)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(network)?;

        if response.status() == StatusCode::PERMANENT_REDIRECT {
            let received = persisted_bytes(response.headers().get(header::RANGE));
            return Ok(ChunkProgress::Incomplete { received });
        }

        let file: DriveFile = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(network)?;
        Ok(ChunkProgress::Complete(file.into()))
    }

    async fn download_chunk(&self, id: &str, offset: u64, len: u64) -> Result<Vec<u8>, DriveError> {
        let end = offset + len.max(1) - 1;
        let response = self
            .client
            .get(self.file_url(id))
            .bearer_auth(self.bearer().await?)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .header(header::RANGE, format!("bytes={}-{}", offset, end))
            .send()
            .await
            .map_err(network)?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        let status = response.status();
        let body = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(network)?;

        // A plain 200 means the range was ignored and the whole object came back.
        if status == StatusCode::OK && offset > 0 {
            let start = (offset as usize).min(body.len());
            let stop = (start + len as usize).min(body.len());
            return Ok(body[start..stop].to_vec());
        }
        Ok(body.to_vec())
    }

    async fn set_public_readable(&self, id: &str) -> Result<(), DriveError> {
        let response = self
            .client
            .post(format!("{}/permissions", self.file_url(id)))
            .bearer_auth(self.bearer().await?)
            .query(&[("supportsAllDrives", "true")])
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await
            .map_err(network)?;

        match ensure_success(response).await {
            Ok(_) => Ok(()),
            Err(e) if is_tolerated_permission_error(&e, id) => {
                tracing::debug!(id, "Sharing not supported for this item: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

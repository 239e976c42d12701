// =============================================================================
// ARIA2 JSON-RPC CLIENT
// =============================================================================
//
// Implements `ExternalDownloader` against a running aria2c daemon started with
// `--enable-rpc`. Every call is a JSON-RPC 2.0 POST to `/jsonrpc`; when the
// daemon has `--rpc-secret` set, the secret goes first in `params` as
// `"token:<secret>"`.
//
// **Environment Variables:**
// - `ARIA2_RPC_URL` - e.g. `http://localhost:6800/jsonrpc`
// - `ARIA2_SECRET` - optional RPC secret

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::core::drive::drive_models::ExternalJobStatus;
use crate::core::drive::{DriveError, ExternalDownloader};

pub const DEFAULT_RPC_URL: &str = "http://localhost:6800/jsonrpc";

/// Upper bound on queued jobs fetched when cancelling everything.
const MAX_WAITING: u32 = 1000;

// =============================================================================
// RPC STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Numbers come back as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TellStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    error_message: Option<String>,
    #[serde(default)]
    followed_by: Vec<String>,
    bittorrent: Option<BitTorrentInfo>,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct BitTorrentInfo {
    info: Option<TorrentName>,
}

#[derive(Debug, Deserialize)]
struct TorrentName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct GidOnly {
    gid: String,
}

fn number(value: &str) -> u64 {
    value.parse().unwrap_or(0)
}

impl From<TellStatus> for ExternalJobStatus {
    fn from(status: TellStatus) -> Self {
        let total_bytes = number(&status.total_length);
        let completed_bytes = number(&status.completed_length);
        let speed = number(&status.download_speed);

        let name = status
            .bittorrent
            .and_then(|b| b.info)
            .map(|i| i.name)
            .or_else(|| {
                status.files.first().and_then(|f| {
                    Path::new(&f.path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                })
            })
            .unwrap_or_default();

        let progress_percent = if total_bytes == 0 {
            0.0
        } else {
            completed_bytes as f64 / total_bytes as f64 * 100.0
        };
        let eta_seconds = (speed > 0).then(|| total_bytes.saturating_sub(completed_bytes) / speed);

        // aria2 reports an errorMessage of "" on healthy jobs.
        let error_message = status.error_message.filter(|m| !m.is_empty()).or_else(|| {
            (status.status == "error").then(|| "aria2 reported an error".to_string())
        });

        ExternalJobStatus {
            complete: status.status == "complete",
            name,
            progress_percent,
            total_bytes,
            completed_bytes,
            speed,
            eta_seconds,
            error_message,
            followed_by: status.followed_by,
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct Aria2Client {
    client: Client,
    rpc_url: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(rpc_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            rpc_url: rpc_url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn from_env() -> Self {
        let url = std::env::var("ARIA2_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        Self::new(url, std::env::var("ARIA2_SECRET").ok())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, DriveError> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(json!(format!("token:{}", secret)));
        }
        all_params.extend(params);

        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": all_params,
        });

        tracing::debug!(method, "aria2 RPC call");
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriveError::Transfer(format!("aria2 is unreachable: {}", e)))?;

        // aria2 answers RPC errors with 400 and a JSON body, so parse regardless of status.
        let status = response.status();
        let rpc: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| DriveError::Transfer(format!("Malformed aria2 response ({}): {}", status, e)))?;

        if let Some(error) = rpc.error {
            return Err(DriveError::Transfer(format!(
                "aria2 error {}: {}",
                error.code, error.message
            )));
        }
        rpc.result
            .ok_or_else(|| DriveError::Transfer(format!("aria2 returned no result for {}", method)))
    }

    fn dir_option(target_dir: &Path) -> Value {
        json!({ "dir": target_dir.to_string_lossy() })
    }
}

#[async_trait]
impl ExternalDownloader for Aria2Client {
    async fn add_uri(&self, uri: &str, target_dir: &Path) -> Result<String, DriveError> {
        self.call("aria2.addUri", vec![json!([uri]), Self::dir_option(target_dir)])
            .await
    }

    async fn add_torrent(&self, torrent: &Path, target_dir: &Path) -> Result<String, DriveError> {
        let bytes = tokio::fs::read(torrent).await?;
        self.call(
            "aria2.addTorrent",
            vec![json!(STANDARD.encode(bytes)), json!([]), Self::dir_option(target_dir)],
        )
        .await
    }

    async fn poll_status(&self, job_id: &str) -> Result<ExternalJobStatus, DriveError> {
        let status: TellStatus = self.call("aria2.tellStatus", vec![json!(job_id)]).await?;
        Ok(status.into())
    }

    async fn discard(&self, job_id: &str) -> Result<(), DriveError> {
        // Jobs that already stopped with an error cannot be removed, only purged.
        if let Err(e) = self
            .call::<String>("aria2.forceRemove", vec![json!(job_id)])
            .await
        {
            tracing::debug!(gid = %job_id, "aria2 job was not active: {}", e);
        }
        let _: String = self
            .call("aria2.removeDownloadResult", vec![json!(job_id)])
            .await?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), DriveError> {
        let keys = json!(["gid"]);
        let mut jobs: Vec<GidOnly> = self.call("aria2.tellActive", vec![keys.clone()]).await?;
        let waiting: Vec<GidOnly> = self
            .call("aria2.tellWaiting", vec![json!(0), json!(MAX_WAITING), keys])
            .await?;
        jobs.extend(waiting);

        for job in &jobs {
            if let Err(e) = self
                .call::<String>("aria2.forceRemove", vec![json!(job.gid)])
                .await
            {
                tracing::warn!(gid = %job.gid, "Failed to remove aria2 job: {}", e);
            }
        }

        let _: String = self.call("aria2.purgeDownloadResult", Vec::new()).await?;
        tracing::info!(removed = jobs.len(), "Cancelled external downloads");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, secret: Option<&str>) -> Aria2Client {
        Aria2Client::new(
            format!("{}/jsonrpc", server.uri()),
            secret.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn add_uri_sends_secret_and_directory() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({
                "method": "aria2.addUri",
                "params": ["token:s3cret", ["https://example.com/a.iso"], { "dir": "/tmp/staging" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "1", "result": "2089b05ecca3d829"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gid = client(&server, Some("s3cret"))
            .add_uri("https://example.com/a.iso", Path::new("/tmp/staging"))
            .await
            .unwrap();
        assert_eq!(gid, "2089b05ecca3d829");
    }

    #[tokio::test]
    async fn add_torrent_encodes_file_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let torrent = tmp.path().join("linux.torrent");
        std::fs::write(&torrent, b"d4:infoe").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "aria2.addTorrent",
                "params": [STANDARD.encode(b"d4:infoe"), []]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "gid-t" })))
            .mount(&server)
            .await;

        let gid = client(&server, None)
            .add_torrent(&torrent, tmp.path())
            .await
            .unwrap();
        assert_eq!(gid, "gid-t");
    }

    #[tokio::test]
    async fn maps_tell_status_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.tellStatus" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "gid": "g1",
                    "status": "active",
                    "totalLength": "1000",
                    "completedLength": "250",
                    "downloadSpeed": "50",
                    "errorMessage": "",
                    "files": [{ "path": "/tmp/staging/ubuntu.iso" }]
                }
            })))
            .mount(&server)
            .await;

        let status = client(&server, None).poll_status("g1").await.unwrap();
        assert!(!status.complete);
        assert_eq!(status.name, "ubuntu.iso");
        assert_eq!(status.progress_percent, 25.0);
        assert_eq!(status.eta_seconds, Some(15));
        assert!(status.error_message.is_none());
    }

    #[test]
    fn magnet_metadata_jobs_report_followers_and_torrent_name() {
        let status: TellStatus = serde_json::from_value(json!({
            "status": "complete",
            "totalLength": "0",
            "completedLength": "0",
            "downloadSpeed": "0",
            "followedBy": ["real-gid"],
            "bittorrent": { "info": { "name": "Big Buck Bunny" } },
            "files": [{ "path": "[METADATA]abc" }]
        }))
        .unwrap();
        let status = ExternalJobStatus::from(status);

        assert!(status.complete);
        assert_eq!(status.name, "Big Buck Bunny");
        assert_eq!(status.followed_by, vec!["real-gid".to_string()]);
        assert_eq!(status.eta_seconds, None);
    }

    #[test]
    fn error_status_without_message_still_fails() {
        let status: TellStatus =
            serde_json::from_value(json!({ "status": "error", "errorMessage": "" })).unwrap();
        assert!(ExternalJobStatus::from(status).error_message.is_some());
    }

    #[tokio::test]
    async fn rpc_errors_become_transfer_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 1, "message": "GID g9 is not found" }
            })))
            .mount(&server)
            .await;

        let err = client(&server, None).poll_status("g9").await.unwrap_err();
        match err {
            DriveError::Transfer(message) => assert!(message.contains("GID g9 is not found")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn discard_purges_a_stopped_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.forceRemove", "params": ["e1"] })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 1, "message": "Active Download not found for GID#e1" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.removeDownloadResult", "params": ["e1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "OK" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None).discard("e1").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_all_removes_active_and_waiting_jobs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.tellActive" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "gid": "a1" }] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.tellWaiting" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "gid": "w1" }] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.forceRemove" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.purgeDownloadResult" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "OK" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None).cancel_all().await.unwrap();
    }
}

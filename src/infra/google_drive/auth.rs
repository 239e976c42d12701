// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================
//
// The bot talks to Drive as a service account. Folders it should write into
// must be shared with the account's email (or live in a shared drive the
// account belongs to).
//
// **Environment Variables:**
// - `GOOGLE_SERVICE_ACCOUNT_KEY` - Path to the service account JSON key file
// - `GOOGLE_SERVICE_ACCOUNT_JSON` - The JSON content directly (for deployment)

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::core::drive::DriveError;

/// Full read/write access to the account's files.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Something that can hand out a bearer token for Drive requests.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, DriveError>;
}

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    client_email: String,
    /// PEM encoded.
    private_key: String,
    token_uri: String,
}

/// JWT claims for the OAuth2 assertion grant.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    /// At most one hour after `iat`.
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Exchanges a signed JWT for an access token and caches it until shortly
/// before it expires.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

// The private key never ends up in logs or panic messages.
impl fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("client_email", &self.credentials.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    pub async fn from_file(path: &str) -> Result<Self, DriveError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, DriveError> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| DriveError::Auth(format!("Invalid service account key: {}", e)))?;
        Ok(Self {
            credentials,
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Reads `GOOGLE_SERVICE_ACCOUNT_KEY` first, then `GOOGLE_SERVICE_ACCOUNT_JSON`.
    pub async fn from_env() -> Result<Self, DriveError> {
        if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            return Self::from_file(&path).await;
        }

        if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            return Self::from_json(&json);
        }

        Err(DriveError::Auth(
            "Neither GOOGLE_SERVICE_ACCOUNT_KEY nor GOOGLE_SERVICE_ACCOUNT_JSON is set.".to_string(),
        ))
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    async fn fetch_new_token(&self) -> Result<(String, Duration), DriveError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DriveError::Auth(e.to_string()))?
            .as_secs();

        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: DRIVE_SCOPE.to_string(),
            aud: self.credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| DriveError::Auth(format!("Invalid private key: {}", e)))?;
        let jwt = encode(&header, &claims, &key).map_err(|e| DriveError::Auth(e.to_string()))?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| DriveError::Auth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DriveError::Auth(format!(
                "Token exchange failed ({}): {}",
                status, text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::Auth(format!("Malformed token response: {}", e)))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        Ok((token.access_token, lifetime))
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, DriveError> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.token.clone());
                }
            }
        }

        tracing::debug!(account = %self.credentials.client_email, "Refreshing Drive access token");
        let (token, lifetime) = self.fetch_new_token().await?;

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(CachedToken {
                token: token.clone(),
                // Refresh five minutes early.
                expires_at: SystemTime::now() + lifetime.saturating_sub(Duration::from_secs(300)),
            });
        }

        Ok(token)
    }
}

/// A fixed token, for tests and for tokens minted outside the bot.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, DriveError> {
        Ok(self.0.clone())
    }
}

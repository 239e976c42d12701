use thiserror::Error;

/// Everything that can go wrong while moving data to or from the drive.
///
/// `Cancelled` is not a failure: callers report it as "cancelled" and keep it
/// apart from the other variants.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Unparseable locator or conflicting arguments. Nothing was attempted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or expired credentials. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-2xx answer from the remote API, with the provider's reason.
    #[error("Remote service error ({status}): {reason}")]
    RemoteService { status: u16, reason: String },

    /// Network or chunk failure in the middle of a transfer.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    pub fn remote(status: u16, reason: impl Into<String>) -> Self {
        DriveError::RemoteService {
            status,
            reason: reason.into(),
        }
    }

    /// A 404 from an existence check is a valid negative answer, not a hard failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::RemoteService { status: 404, .. })
    }

    /// Permission errors route downloads to the public-share fallback.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, DriveError::RemoteService { status: 403, .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriveError::Cancelled)
    }

    /// Wrap an API error raised mid-transfer. Cancellation and auth errors keep their kind.
    pub fn into_transfer(self) -> Self {
        match self {
            DriveError::Cancelled | DriveError::Auth(_) | DriveError::Transfer(_) => self,
            other => DriveError::Transfer(other.to_string()),
        }
    }
}

// Cooperative cancellation for transfer jobs.
//
// A signal is polled at every loop boundary (chunk, directory entry, listing
// page, agent poll). Nothing is interrupted mid-request, so the worst-case
// latency is one chunk. Once set, a signal stays set: a new job gets a new
// signal from its session instead of resetting the old one.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::drive_error::DriveError;

#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Calling it again is a no-op.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once the signal is set; used with `?` at loop boundaries.
    pub fn check(&self) -> Result<(), DriveError> {
        if self.is_set() {
            Err(DriveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the signal is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the signal fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DriveError> {
        tokio::select! {
            _ = self.cancelled() => Err(DriveError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

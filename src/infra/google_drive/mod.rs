// =============================================================================
// GOOGLE DRIVE MODULE
// =============================================================================
//
// Implementations of the Drive ports from `core::drive`.
//
// - `drive_client`: the authenticated Drive v3 REST API (`RemoteDrive`)
// - `public_share`: the unauthenticated `uc?export=download` endpoint (`PublicShare`)
// - `auth`: service account token exchange

pub mod auth;
pub mod drive_client;
#[cfg(test)]
pub mod in_memory;
pub mod public_share;

pub use auth::ServiceAccountAuth;
pub use drive_client::GoogleDriveClient;
#[cfg(test)]
pub use in_memory::{InMemoryDrive, InMemoryShare};
pub use public_share::PublicShareClient;

// The infra module contains implementations of core traits.
// Each backing service gets its own submodule.

#[path = "google_drive/mod.rs"]
pub mod google_drive;

#[path = "aria2/mod.rs"]
pub mod aria2;

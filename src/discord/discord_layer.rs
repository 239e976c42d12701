// Discord layer - commands and the status message adapter.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "drive/mod.rs"]
pub mod drive;

// Re-export the shared command state for the composition root
pub use commands::gdrive::Data;

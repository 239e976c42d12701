pub mod cancellation;
pub mod drive_error;
pub mod drive_models;
pub mod drive_ports;
pub mod drive_service;
pub mod formatting;
pub mod locator;
pub mod progress;
pub mod replicator;
pub mod session;
pub mod transfer_service;

pub use cancellation::CancellationSignal;
pub use drive_error::DriveError;
pub use drive_models::{
    BatchReport, FolderOutcome, ItemOutcome, RemoteObjectRef, ReplicationSummary, TransferSummary,
};
pub use drive_ports::{ChunkSource, ExternalDownloader, PublicShare, RemoteDrive, StatusChannel};
pub use drive_service::{folder_link, DriveService, LookupResults};
pub use locator::PathResolver;
pub use session::JobContext;
pub use transfer_service::TransferConfig;

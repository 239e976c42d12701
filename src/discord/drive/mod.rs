pub mod formatter;
pub mod status_message;

pub use status_message::MessageStatus;

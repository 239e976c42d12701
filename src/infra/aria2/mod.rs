// External download agent for plain URLs, magnet links and torrent files.

pub mod client;

pub use client::Aria2Client;

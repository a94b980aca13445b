#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod record;
pub mod remote;
pub mod service;
pub mod store;
pub mod watcher;

pub use error::{SyncError, TransportError};
pub type Result<T> = std::result::Result<T, SyncError>;

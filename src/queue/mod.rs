//! Directory-backed durable queue and the pool watcher that drains it.

pub mod item;
pub mod staging;
pub mod watcher;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task::JoinError;

use crate::processor::ProcessError;

pub use item::{ItemState, QueueItem};
pub use staging::{CACHE_DIR_NAME, InvalidEntry, QueueDirs};
pub use watcher::{PoolStatus, Watcher, WatcherSettings};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid transition for '{item}': {from} -> {to}")]
    InvalidTransition {
        item: String,
        from: ItemState,
        to: ItemState,
    },

    #[error("{item} failed: {source}")]
    ItemFailed {
        item: String,
        #[source]
        source: ProcessError,
    },

    #[error("{item} panicked: {source}")]
    WorkerPanicked {
        item: String,
        #[source]
        source: JoinError,
    },

    #[error("{item} was not delivered to '{path}'")]
    NotDelivered { item: String, path: PathBuf },
}

pub(crate) fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> QueueError {
    let path = path.to_path_buf();
    move |source| QueueError::Io {
        action,
        path,
        source,
    }
}

//! Result storage port.
//!
//! Task outputs of an execution are persisted as one JSON object keyed by
//! task name. Backends share [`encode_results`], which enforces the size cap:
//! an oversized result set is a fatal save error, never truncated.

pub mod memory;

use std::future::Future;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::workflow::context::ExecutionScope;

pub use memory::InMemoryResultStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("result of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("result storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("result serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored result is not a JSON object")]
    Corrupt,
}

pub trait ResultStorage: Send + Sync + 'static {
    /// Persist `results` and return a locator (path or URI).
    fn save_result(
        &self,
        scope: &ExecutionScope,
        results: &Map<String, Value>,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    /// `None` when nothing was saved for this execution.
    fn load_result(
        &self,
        scope: &ExecutionScope,
    ) -> impl Future<Output = Result<Option<Map<String, Value>>, StorageError>> + Send;
}

/// Serialise `results` as UTF-8 JSON, rejecting anything over `max_size` bytes.
pub fn encode_results(results: &Map<String, Value>, max_size: u64) -> Result<Vec<u8>, StorageError> {
    let bytes = serde_json::to_vec(results)?;
    let size = bytes.len() as u64;
    if size > max_size {
        return Err(StorageError::TooLarge {
            size,
            limit: max_size,
        });
    }
    Ok(bytes)
}

/// Parse bytes written by [`encode_results`].
pub fn decode_results(bytes: &[u8]) -> Result<Map<String, Value>, StorageError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(StorageError::Corrupt),
    }
}

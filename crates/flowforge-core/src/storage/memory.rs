//! In-memory `ResultStorage`.

use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ResultStorage, StorageError, decode_results, encode_results};
use crate::workflow::context::ExecutionScope;

/// Keeps encoded results in a map keyed by execution id, applying the same
/// size cap as durable backends.
#[derive(Debug)]
pub struct InMemoryResultStorage {
    max_size: u64,
    results: DashMap<Uuid, Vec<u8>>,
}

impl InMemoryResultStorage {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            results: DashMap::new(),
        }
    }
}

impl Default for InMemoryResultStorage {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

impl ResultStorage for InMemoryResultStorage {
    async fn save_result(
        &self,
        scope: &ExecutionScope,
        results: &Map<String, Value>,
    ) -> Result<String, StorageError> {
        let bytes = encode_results(results, self.max_size)?;
        self.results.insert(scope.execution_id, bytes);
        Ok(format!(
            "memory://{}/{}/{}",
            scope.user_id, scope.workflow_id, scope.execution_id
        ))
    }

    async fn load_result(
        &self,
        scope: &ExecutionScope,
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        self.results
            .get(&scope.execution_id)
            .map(|bytes| decode_results(&bytes))
            .transpose()
    }
}

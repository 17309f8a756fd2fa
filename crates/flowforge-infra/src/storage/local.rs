//! Filesystem `ResultStorage`.
//!
//! Results live at `{base}/{user_id}/{workflow_id}/{execution_id}.json`.
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never sees a partial file.

use std::path::PathBuf;

use flowforge_core::storage::{ResultStorage, StorageError, decode_results, encode_results};
use flowforge_core::workflow::context::ExecutionScope;
use serde_json::{Map, Value};

pub struct LocalResultStorage {
    base: PathBuf,
    max_size: u64,
}

impl LocalResultStorage {
    pub fn new(base: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            base: base.into(),
            max_size,
        }
    }

    pub fn path_for(&self, scope: &ExecutionScope) -> PathBuf {
        self.base
            .join(sanitize(&scope.user_id))
            .join(scope.workflow_id.to_string())
            .join(format!("{}.json", scope.execution_id))
    }
}

/// Keep user ids from escaping the base directory.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

impl ResultStorage for LocalResultStorage {
    async fn save_result(
        &self,
        scope: &ExecutionScope,
        results: &Map<String, Value>,
    ) -> Result<String, StorageError> {
        let bytes = encode_results(results, self.max_size)?;
        let path = self.path_for(scope);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(execution_id = %scope.execution_id, bytes = bytes.len(), path = %path.display(), "results saved");
        Ok(path.display().to_string())
    }

    async fn load_result(
        &self,
        scope: &ExecutionScope,
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        match tokio::fs::read(self.path_for(scope)).await {
            Ok(bytes) => decode_results(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

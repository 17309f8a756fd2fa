//! Process plugin runtime.
//!
//! Each invocation spawns the entrypoint, writes one JSON request to stdin
//! and reads one JSON response from stdout:
//!
//! ```text
//! -> {"operation": "execute", "parameters": {...}}
//! <- {"output": <any>}      or      {"error": "message"}
//! ```
//!
//! A non-zero exit status is an invocation failure carrying stderr.

use std::path::PathBuf;
use std::process::Stdio;

use flowforge_core::plugin::{InstalledPlugin, LoadableUnit, PluginError, PluginLoader};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessPluginLoader;

impl PluginLoader for ProcessPluginLoader {
    type Unit = ProcessUnit;

    async fn load(&self, plugin: &InstalledPlugin) -> Result<ProcessUnit, PluginError> {
        ProcessUnit::new(plugin)
    }
}

/// A process plugin. Stateless between invocations.
#[derive(Debug, Clone)]
pub struct ProcessUnit {
    entrypoint: PathBuf,
    workdir: PathBuf,
}

impl ProcessUnit {
    pub fn new(plugin: &InstalledPlugin) -> Result<Self, PluginError> {
        let entrypoint = plugin.entrypoint();
        if !entrypoint.is_file() {
            return Err(PluginError::Load(format!(
                "entrypoint {} does not exist",
                entrypoint.display()
            )));
        }
        Ok(Self {
            entrypoint,
            workdir: plugin.path.clone(),
        })
    }
}

impl LoadableUnit for ProcessUnit {
    async fn invoke(&self, operation: &str, parameters: &Map<String, Value>) -> Result<Value, PluginError> {
        let request = json!({ "operation": operation, "parameters": parameters }).to_string();

        let mut child = tokio::process::Command::new(&self.entrypoint)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::Invoke(format!("spawn {}: {e}", self.entrypoint.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A plugin may exit without reading its request.
            if let Err(e) = stdin.write_all(request.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(PluginError::Invoke(format!("write request: {e}")));
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PluginError::Invoke(format!("wait: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::Invoke(format!(
                "plugin exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let response: ProcessResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| PluginError::Invoke(format!("invalid plugin response: {e}")))?;
        match response.error {
            Some(message) => Err(PluginError::Invoke(message)),
            None => Ok(response.output),
        }
    }

    async fn unload(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

//! WebAssembly plugin runtime.
//!
//! Plugins are core modules exporting:
//! - `memory`
//! - `alloc(len: i32) -> i32`, returning a buffer for the request
//! - `invoke(ptr: i32, len: i32) -> i64`, returning `ptr << 32 | len` of the
//!   JSON response in linear memory
//!
//! The request and response use the same JSON shapes as process plugins.
//! Every invocation gets a fresh `Store` with the configured fuel budget, so
//! plugins cannot keep state between calls and runaway loops trap.

use std::sync::Arc;

use flowforge_core::plugin::{InstalledPlugin, LoadableUnit, PluginError, PluginLoader};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use wasmtime::{Config, Engine, Instance, Module, Store};

#[derive(Debug, Deserialize)]
struct WasmResponse {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Compiles `.wasm` entrypoints with a shared engine.
#[derive(Clone)]
pub struct WasmPluginLoader {
    engine: Engine,
    fuel: u64,
}

impl WasmPluginLoader {
    pub fn new(fuel: u64) -> Result<Self, PluginError> {
        let mut config = Config::new();
        config.async_support(true);
        config.consume_fuel(true);
        config.wasm_threads(false);
        let engine = Engine::new(&config).map_err(|e| PluginError::Load(e.to_string()))?;
        Ok(Self { engine, fuel })
    }

    /// Compile a module from bytes (binary or, in tests, WAT text).
    pub fn compile(&self, bytes: &[u8]) -> Result<WasmUnit, PluginError> {
        let module = Module::new(&self.engine, bytes).map_err(|e| PluginError::Load(e.to_string()))?;
        Ok(WasmUnit {
            engine: self.engine.clone(),
            module: Arc::new(module),
            fuel: self.fuel,
        })
    }
}

impl PluginLoader for WasmPluginLoader {
    type Unit = WasmUnit;

    async fn load(&self, plugin: &InstalledPlugin) -> Result<WasmUnit, PluginError> {
        let path = plugin.entrypoint();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PluginError::Load(format!("{}: {e}", path.display())))?;
        let unit = self.compile(&bytes)?;
        tracing::debug!(plugin = %plugin.plugin, path = %path.display(), "wasm module compiled");
        Ok(unit)
    }
}

pub struct WasmUnit {
    engine: Engine,
    module: Arc<Module>,
    fuel: u64,
}

impl WasmUnit {
    async fn call(&self, request: &[u8]) -> Result<Vec<u8>, wasmtime::Error> {
        let mut store = Store::new(&self.engine, ());
        store.set_fuel(self.fuel)?;

        let instance = Instance::new_async(&mut store, &self.module, &[]).await?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| wasmtime::Error::msg("module does not export `memory`"))?;
        let alloc = instance.get_typed_func::<i32, i32>(&mut store, "alloc")?;
        let invoke = instance.get_typed_func::<(i32, i32), i64>(&mut store, "invoke")?;

        let len = i32::try_from(request.len())?;
        let ptr = alloc.call_async(&mut store, len).await?;
        memory.write(&mut store, usize::try_from(ptr)?, request)?;

        let packed = invoke.call_async(&mut store, (ptr, len)).await? as u64;
        let out_ptr = (packed >> 32) as usize;
        let out_len = (packed & 0xffff_ffff) as usize;
        let mut response = vec![0u8; out_len];
        memory.read(&store, out_ptr, &mut response)?;
        Ok(response)
    }
}

impl LoadableUnit for WasmUnit {
    async fn invoke(&self, operation: &str, parameters: &Map<String, Value>) -> Result<Value, PluginError> {
        let request = json!({ "operation": operation, "parameters": parameters }).to_string();
        let bytes = self
            .call(request.as_bytes())
            .await
            .map_err(|e| PluginError::Invoke(format!("wasm trap: {e}")))?;

        let response: WasmResponse = serde_json::from_slice(&bytes)
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

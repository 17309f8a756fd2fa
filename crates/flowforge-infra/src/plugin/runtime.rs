//! Loader that picks the runtime declared in the package manifest.

use flowforge_core::plugin::{InstalledPlugin, LoadableUnit, PluginError, PluginLoader};
use flowforge_types::plugin::PluginRuntime;
use serde_json::{Map, Value};

use super::process::{ProcessPluginLoader, ProcessUnit};
use super::wasm::{WasmPluginLoader, WasmUnit};

pub struct RuntimePluginLoader {
    process: ProcessPluginLoader,
    wasm: WasmPluginLoader,
}

impl RuntimePluginLoader {
    pub fn new(wasm_fuel: u64) -> Result<Self, PluginError> {
        Ok(Self {
            process: ProcessPluginLoader,
            wasm: WasmPluginLoader::new(wasm_fuel)?,
        })
    }
}

pub enum RuntimeUnit {
    Process(ProcessUnit),
    Wasm(WasmUnit),
}

impl PluginLoader for RuntimePluginLoader {
    type Unit = RuntimeUnit;

    async fn load(&self, plugin: &InstalledPlugin) -> Result<RuntimeUnit, PluginError> {
        match plugin.manifest.runtime {
            PluginRuntime::Process => self.process.load(plugin).await.map(RuntimeUnit::Process),
            PluginRuntime::Wasm => self.wasm.load(plugin).await.map(RuntimeUnit::Wasm),
        }
    }
}

impl LoadableUnit for RuntimeUnit {
    async fn invoke(&self, operation: &str, parameters: &Map<String, Value>) -> Result<Value, PluginError> {
        match self {
            RuntimeUnit::Process(unit) => unit.invoke(operation, parameters).await,
            RuntimeUnit::Wasm(unit) => unit.invoke(operation, parameters).await,
        }
    }

    async fn unload(&self) -> Result<(), PluginError> {
        match self {
            RuntimeUnit::Process(unit) => unit.unload().await,
            RuntimeUnit::Wasm(unit) => unit.unload().await,
        }
    }
}

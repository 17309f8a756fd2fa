//! Plugin source and runtimes.
//!
//! - `registry` -- downloads, verifies and extracts packages
//! - `process` / `wasm` -- the two plugin runtimes
//! - `runtime` -- dispatches on the manifest's `runtime`

pub mod process;
pub mod registry;
pub mod runtime;
pub mod wasm;

pub use process::ProcessPluginLoader;
pub use registry::RegistryPluginSource;
pub use runtime::RuntimePluginLoader;
pub use wasm::WasmPluginLoader;

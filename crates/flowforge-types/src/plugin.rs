//! Plugin reference and manifest types.

use serde::{Deserialize, Serialize};

/// Address of a plugin package in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub name: String,
    /// Semver version string.
    pub version: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl PluginRef {
    /// Fully qualified plugin type: `namespace/name`.
    pub fn plugin_type(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for PluginRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.version)
    }
}

/// How a plugin's entrypoint is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginRuntime {
    /// Native executable speaking JSON over stdin/stdout.
    Process,
    /// WebAssembly core module run under a fuel budget.
    Wasm,
}

/// `plugin.toml` shipped inside every plugin package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub runtime: PluginRuntime,
    /// Path of the executable or `.wasm` file, relative to the package root.
    pub entrypoint: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Operations the plugin answers. Empty means any.
    #[serde(default)]
    pub operations: Vec<String>,
    /// Declared parameter schema.
    #[serde(default)]
    pub specifications: Vec<PluginSpecification>,
}

/// One declared parameter of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginSpecification {
    pub name: String,
    #[serde(rename = "type", default)]
    pub spec_type: SpecType,
    #[serde(default)]
    pub required: bool,
}

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl SpecType {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            SpecType::String => value.is_string(),
            SpecType::Number => value.is_number(),
            SpecType::Integer => value.is_i64() || value.is_u64(),
            SpecType::Boolean => value.is_boolean(),
            SpecType::Object => value.is_object(),
            SpecType::Array => value.is_array(),
            SpecType::Any => !matches!(value, Value::Null),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecType::String => "string",
            SpecType::Number => "number",
            SpecType::Integer => "integer",
            SpecType::Boolean => "boolean",
            SpecType::Object => "object",
            SpecType::Array => "array",
            SpecType::Any => "any",
        }
    }
}

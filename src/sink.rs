use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::loader::convert_toml_value_to_json;
use crate::name::PackageName;
use crate::types::{Location, Value};

/// An external script ready to be materialized.
#[derive(Debug)]
pub struct ExternalScript<'a> {
    pub name: &'a PackageName,
    pub location: &'a Location,
    pub source: &'a str,
    /// Symbol whose value becomes the package value.
    pub export: &'a str,
    /// `(local symbol, registry value)` pairs visible to the script.
    pub bindings: &'a [(String, Value)],
}

/// Mutates the host environment so a loaded external script takes effect.
pub trait Sink: Send + Sync {
    fn materialize(&self, script: ExternalScript<'_>) -> Result<Value>;
}

/// A global object shared by all external scripts.
///
/// Scripts are TOML tables of global assignments. Injected bindings are
/// installed first, so a script can see its dependencies.
#[derive(Debug, Default)]
pub struct GlobalScope {
    globals: Mutex<BTreeMap<String, Value>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<Value> {
        self.globals.lock().get(symbol).cloned()
    }

    pub fn set(&self, symbol: &str, value: Value) {
        self.globals.lock().insert(symbol.to_string(), value);
    }
}

impl Sink for GlobalScope {
    fn materialize(&self, script: ExternalScript<'_>) -> Result<Value> {
        let assignments: toml::Table = toml::from_str(script.source).map_err(|e| {
            anyhow::anyhow!("Failed to parse external script at {}: {e}", script.location)
        })?;

        let mut globals = self.globals.lock();
        for (symbol, value) in script.bindings {
            globals.insert(symbol.clone(), value.clone());
        }
        for (symbol, value) in &assignments {
            globals.insert(symbol.clone(), Value::data(convert_toml_value_to_json(value)?));
        }
        tracing::debug!(
            "Materialized external script for '{}' from {} ({} globals)",
            script.name,
            script.location,
            assignments.len()
        );

        globals.get(script.export).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "External script at {} did not define '{}'",
                script.location,
                script.export
            )
        })
    }
}

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::name::{PackageName, expand_relative};
use crate::registry::Registry;
use crate::types::{Exports, Location, LocationSpec, Value};

/// Fetched source text together with where it came from.
#[derive(Debug, Clone)]
pub struct SourceText {
    /// The package whose request caused this fetch, if any.
    pub origin: Option<PackageName>,
    pub location: Location,
    pub text: String,
}

/// Runs fetched source against the registry. Evaluating a source is expected
/// to define (at least) the package it was fetched for.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, registry: &Registry, source: &SourceText) -> Result<()>;
}

/// A package source file: configuration entries, aliases and definitions.
///
/// ```toml
/// [config."ui.*"]
/// path = "lib/ui/"
///
/// [aliases]
/// picker = "ui.date_picker"
///
/// [package."ui.date_picker"]
/// requires = [".calendar", "ui.themes.*"]
/// value = { format = "yyyy-mm-dd" }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSource {
    #[serde(default)]
    pub config: BTreeMap<String, LocationSpec>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default, rename = "package")]
    pub packages: BTreeMap<String, PackageDeclaration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDeclaration {
    #[serde(default)]
    pub requires: Vec<String>,
    pub value: Option<toml::Value>,
}

impl PackageSource {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow::anyhow!("Failed to parse package source: {e}"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
    }
}

/// Evaluates [`PackageSource`] files.
///
/// A package without `requires` exports its `value` verbatim (an empty
/// object when absent). With `requires`, the members of a table `value` are
/// copied onto the package object and every dependency is bound under its
/// last component; a non-table `value` is exported as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestEvaluator;

impl Evaluator for ManifestEvaluator {
    fn evaluate(&self, registry: &Registry, source: &SourceText) -> Result<()> {
        let manifest = PackageSource::parse(&source.text)
            .map_err(|e| anyhow::anyhow!("{}: {e}", source.location))?;
        let parent = source
            .origin
            .as_ref()
            .map(|origin| origin.parent().to_string())
            .unwrap_or_default();

        for (name, spec) in manifest.config {
            registry.configure(&expand_relative(&name, &parent), spec)?;
        }
        for (alias, target) in manifest.aliases {
            registry.register_alias(&alias, &expand_relative(&target, &parent))?;
        }

        for (raw_name, declaration) in manifest.packages {
            let name = registry.resolve(&raw_name, Some(&parent))?;
            let value = declaration
                .value
                .as_ref()
                .map(convert_toml_value_to_json)
                .transpose()?;

            if declaration.requires.is_empty() {
                let exported = value.map(value_from_json).unwrap_or_default();
                registry.define_value(name.as_str(), exported)?;
                continue;
            }

            let keys = declaration
                .requires
                .iter()
                .map(|dependency| -> Result<String> {
                    let resolved = registry.resolve(dependency, Some(name.parent()))?;
                    Ok(match resolved.binding_key() {
                        "" => resolved.as_str().to_string(),
                        key => key.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let dependencies: Vec<&str> = declaration.requires.iter().map(String::as_str).collect();

            registry.define_with_dependencies(
                name.as_str(),
                &dependencies,
                move |exports: &mut Exports, values: &[Value]| match value {
                    Some(serde_json::Value::Object(fields)) => {
                        bind_members(exports, fields, &keys, values);
                        None
                    }
                    None => {
                        bind_members(exports, serde_json::Map::new(), &keys, values);
                        None
                    }
                    Some(other) => Some(Value::data(other)),
                },
            )?;
        }
        Ok(())
    }
}

fn bind_members(
    exports: &mut Exports,
    fields: serde_json::Map<String, serde_json::Value>,
    keys: &[String],
    values: &[Value],
) {
    for (key, field) in fields {
        exports.insert(key, Value::data(field));
    }
    for (key, value) in keys.iter().zip(values) {
        exports.insert(key.clone(), value.clone());
    }
}

/// Tables become package objects with one member per key.
pub fn value_from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Object(fields) => Value::object(
            fields
                .into_iter()
                .map(|(key, field)| (key, Value::data(field)))
                .collect(),
        ),
        other => Value::data(other),
    }
}

pub fn convert_toml_table_to_json_map(
    table: &toml::map::Map<String, toml::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut map = serde_json::Map::new();
    for (key, value) in table {
        map.insert(key.clone(), convert_toml_value_to_json(value)?);
    }
    Ok(map)
}

pub fn convert_toml_value_to_json(value: &toml::Value) -> Result<serde_json::Value> {
    match value {
        toml::Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        toml::Value::Integer(i) => Ok(serde_json::Value::Number((*i).into())),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| anyhow::anyhow!("Cannot represent {f} as a package value")),
        toml::Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        toml::Value::Array(arr) => {
            let json_arr: Result<Vec<_>> = arr.iter().map(convert_toml_value_to_json).collect();
            Ok(serde_json::Value::Array(json_arr?))
        }
        toml::Value::Table(table) => Ok(serde_json::Value::Object(
            convert_toml_table_to_json_map(table)?,
        )),
        toml::Value::Datetime(dt) => Ok(serde_json::Value::String(dt.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let source = PackageSource::parse(
            r#"
            [config."ui.*"]
            path = "lib/ui/"

            [aliases]
            picker = "ui.date_picker"

            [package."ui.date_picker"]
            requires = [".calendar"]
            value = { format = "yyyy-mm-dd", weeks = 6 }

            [package."ui.calendar"]
            "#,
        )
        .unwrap();
        assert_eq!(source.config["ui.*"].path.as_deref(), Some("lib/ui/"));
        assert_eq!(source.aliases["picker"], "ui.date_picker");
        assert_eq!(source.packages["ui.date_picker"].requires, vec![".calendar"]);
        assert!(source.packages["ui.calendar"].value.is_none());
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(PackageSource::parse("[packages.x]\nvalue = 1").is_err());
    }

    #[test]
    fn toml_values_convert_to_json() {
        let value: toml::Value = toml::from_str("a = [1, 2.5, true, { b = 'c' }]").unwrap();
        let json = convert_toml_value_to_json(&value).unwrap();
        assert_eq!(json, serde_json::json!({"a": [1, 2.5, true, {"b": "c"}]}));
    }
}

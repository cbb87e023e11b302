use anyhow::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::name::{PackageName, SEPARATOR, WILDCARD, join};
use crate::types::LocationSpec;

/// A configuration entry computed from the name components that the
/// matched wildcard prefix does not cover.
pub type ComputeFn = dyn Fn(&[&str]) -> Option<LocationSpec> + Send + Sync;

#[derive(Clone)]
pub enum ConfigEntry {
    Static(LocationSpec),
    Computed(Arc<ComputeFn>),
}

impl ConfigEntry {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&[&str]) -> Option<LocationSpec> + Send + Sync + 'static,
    {
        ConfigEntry::Computed(Arc::new(f))
    }
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigEntry::Static(spec) => f.debug_tuple("Static").field(spec).finish(),
            ConfigEntry::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<LocationSpec> for ConfigEntry {
    fn from(spec: LocationSpec) -> Self {
        ConfigEntry::Static(spec)
    }
}

/// Per-name location configuration with wildcard fallback.
#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    entries: HashMap<String, ConfigEntry>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or merges an entry. Static specs merge field by field,
    /// computed entries replace whatever was there.
    pub fn set(&mut self, name: &str, entry: ConfigEntry) {
        match (self.entries.get_mut(name), entry) {
            (Some(ConfigEntry::Static(existing)), ConfigEntry::Static(newer)) => {
                existing.merge(newer);
            }
            (_, entry) => {
                self.entries.insert(name.to_string(), entry);
            }
        }
    }

    /// Sets an entry only when the exact name has none yet.
    pub fn set_if_absent(&mut self, name: &str, spec: LocationSpec) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries
            .insert(name.to_string(), ConfigEntry::Static(spec));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Most specific match first: `a.b.c`, then `a.b.*`, `a.*`, `*`.
    /// Computed entries returning `None` fall through to the next ancestor.
    /// Whatever is found is cached under the exact name.
    pub fn find(&mut self, name: &PackageName) -> Option<LocationSpec> {
        if let Some(ConfigEntry::Static(spec)) = self.entries.get(name.as_str()) {
            return Some(spec.clone());
        }

        let components = name.components();
        let found = (0..components.len()).rev().find_map(|covered| {
            let pattern = join(&components[..covered].join(&SEPARATOR.to_string()), WILDCARD);
            match self.entries.get(&pattern)? {
                ConfigEntry::Static(spec) => Some(spec.clone()),
                ConfigEntry::Computed(compute) => compute(&components[covered..]),
            }
        })?;

        self.entries
            .insert(name.as_str().to_string(), ConfigEntry::Static(found.clone()));
        Some(found)
    }

    /// Exact static entries, for reporting.
    pub fn static_entries(&self) -> BTreeMap<String, LocationSpec> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| match entry {
                ConfigEntry::Static(spec) => Some((name.clone(), spec.clone())),
                ConfigEntry::Computed(_) => None,
            })
            .collect()
    }
}

/// Turns a wildcard spec whose path or url ends in `/` into a directory
/// mapping: `a.*` with `path = "lib/a/"` maps `a.b.c` to `lib/a/b/c.<ext>`.
pub fn directory_entry(spec: LocationSpec, extension: &str) -> ConfigEntry {
    let maps_path = spec.path.as_deref().is_some_and(|p| p.ends_with('/'));
    let maps_url = spec.url.as_deref().is_some_and(|u| u.ends_with('/'));
    if !maps_path && !maps_url {
        return ConfigEntry::Static(spec);
    }
    let extension = extension.to_string();
    ConfigEntry::computed(move |rest: &[&str]| {
        if rest.is_empty() {
            return None;
        }
        let relative = format!("{}.{extension}", rest.join("/"));
        let mut derived = spec.clone();
        if maps_path {
            derived.path = spec.path.as_ref().map(|dir| format!("{dir}{relative}"));
        }
        if maps_url {
            derived.url = spec.url.as_ref().map(|base| format!("{base}{relative}"));
        }
        derived.alias = None;
        Some(derived)
    })
}

/// Startup settings for a registry, usually read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySettings {
    /// File extension of package sources.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Character accepted in names in place of `_`.
    #[serde(default = "default_substitute")]
    pub separator_substitute: char,
    /// Seed location configuration.
    #[serde(default)]
    pub config: BTreeMap<String, LocationSpec>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Names that will be defined by something other than a fetch.
    #[serde(default)]
    pub predefined: Vec<String>,
}

pub fn default_extension() -> String {
    "toml".to_string()
}

pub fn default_substitute() -> char {
    '-'
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            separator_substitute: default_substitute(),
            config: BTreeMap::new(),
            aliases: BTreeMap::new(),
            predefined: Vec::new(),
        }
    }
}

impl RegistrySettings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse settings: {e}"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read settings {}: {e}", path.display()))?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn name(raw: &str) -> PackageName {
        PackageName::parse(raw).unwrap()
    }

    #[test]
    fn exact_entry_wins_over_wildcards() {
        let mut store = ConfigStore::new();
        store.set("a.*", LocationSpec::path("wild.toml").into());
        store.set("a.b", LocationSpec::path("exact.toml").into());
        assert_eq!(store.find(&name("a.b")).unwrap().path.as_deref(), Some("exact.toml"));
        assert_eq!(store.find(&name("a.c")).unwrap().path.as_deref(), Some("wild.toml"));
        assert!(store.find(&name("z")).is_none());
    }

    #[test]
    fn computed_entries_receive_uncovered_suffix_and_are_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut store = ConfigStore::new();
        store.set(
            "a.*",
            ConfigEntry::computed(move |rest| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(LocationSpec::path(rest.join("/")))
            }),
        );

        let first = store.find(&name("a.b.c")).unwrap();
        assert_eq!(first.path.as_deref(), Some("b/c"));
        let second = store.find(&name("a.b.c")).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_none_falls_through_to_less_specific() {
        let mut store = ConfigStore::new();
        store.set("a.b.*", ConfigEntry::computed(|_| None));
        store.set("*", LocationSpec::url("http://cdn.example/root.toml").into());
        let found = store.find(&name("a.b.c")).unwrap();
        assert_eq!(found.url.as_deref(), Some("http://cdn.example/root.toml"));
    }

    #[test]
    fn static_specs_merge() {
        let mut store = ConfigStore::new();
        store.set("a", LocationSpec::path("a.toml").into());
        store.set(
            "a",
            LocationSpec {
                alias: Some("short".into()),
                ..LocationSpec::default()
            }
            .into(),
        );
        let spec = store.find(&name("a")).unwrap();
        assert_eq!(spec.path.as_deref(), Some("a.toml"));
        assert_eq!(spec.alias.as_deref(), Some("short"));
    }

    #[test]
    fn directory_entries_map_suffix_to_path() {
        let mut store = ConfigStore::new();
        store.set("ui.*", directory_entry(LocationSpec::path("lib/ui/"), "toml"));
        let spec = store.find(&name("ui.forms.input")).unwrap();
        assert_eq!(spec.path.as_deref(), Some("lib/ui/forms/input.toml"));
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings = RegistrySettings::from_toml(
            r#"
            predefined = ["app.main"]

            [config."jq"]
            external = { locations = "http://cdn.example/jq.js", export = "jQuery" }

            [aliases]
            main = "app.main"
            "#,
        )
        .unwrap();
        assert_eq!(settings.extension, "toml");
        assert_eq!(settings.separator_substitute, '-');
        assert_eq!(settings.predefined, vec!["app.main"]);
        let external = settings.config["jq"].external.as_ref().unwrap();
        assert_eq!(external.locations, vec!["http://cdn.example/jq.js"]);
        assert_eq!(settings.aliases["main"], "app.main");
    }
}

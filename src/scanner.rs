use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::loader::PackageSource;
use crate::name::{NameResolver, PackageName, SEPARATOR};
use crate::types::LocationSpec;

/// What one scanned file declares and requires, by absolute name.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub source: String,
    pub declares: Vec<String>,
    pub requires: Vec<String>,
}

#[derive(Serialize)]
struct ScanOutput {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    aliases: BTreeMap<String, String>,
    config: BTreeMap<String, LocationSpec>,
}

#[derive(Debug, Default)]
pub struct ConfigScanner {
    resolver: NameResolver,
    config: BTreeMap<String, LocationSpec>,
    aliases: BTreeMap<String, String>,
    files: Vec<ScannedFile>,
}

impl ConfigScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: NameResolver) -> Self {
        Self {
            resolver,
            ..Self::default()
        }
    }

    pub fn scan_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        self.scan_source(path, source)
    }

    /// Scans `source` as if it had been read from `path`.
    pub fn scan_source(&mut self, path: &Path, source: String) -> Result<()> {
        let manifest =
            PackageSource::parse(&source).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        let file = path.to_string_lossy().replace('\\', "/");
        let no_aliases = HashMap::new();

        for (raw, spec) in manifest.config {
            let name = self.absolute(&raw, &file)?;
            if let Some(alias) = &spec.alias
                && !name.is_wildcard()
            {
                self.aliases.insert(alias.clone(), name.to_string());
            }
            self.record(name.as_str(), spec, &file)?;
        }
        for (alias, target) in manifest.aliases {
            let target = self.absolute(&target, &file)?;
            self.aliases.insert(alias, target.to_string());
        }

        let mut declares = Vec::new();
        let mut requires = Vec::new();
        for (raw, declaration) in manifest.packages {
            let name = self.absolute(&raw, &file)?;
            for dependency in &declaration.requires {
                let dependency = self.resolver.resolve(dependency, Some(name.parent()), &no_aliases)?;
                if !requires.contains(&dependency.to_string()) {
                    requires.push(dependency.to_string());
                }
            }
            self.record(name.as_str(), LocationSpec::path(file.clone()), &file)?;
            declares.push(name.to_string());
        }
        tracing::debug!(
            "Scanned {file}: declares {declares:?}, requires {requires:?}"
        );

        self.files.push(ScannedFile {
            path: path.to_path_buf(),
            source,
            declares,
            requires,
        });
        Ok(())
    }

    /// Resolves a declared name. Relative names only mean something next to
    /// the package that loads the file, so they are rejected here.
    fn absolute(&self, raw: &str, file: &str) -> Result<PackageName> {
        if raw.trim_start().starts_with(SEPARATOR) {
            return Err(ScanError::RelativeName {
                name: raw.to_string(),
                file: file.to_string(),
            }
            .into());
        }
        Ok(self.resolver.resolve(raw, None, &HashMap::new())?)
    }

    /// Merges `spec` into the entry for `name`. Two entries conflict when a
    /// field is set in both with different values; a path arriving for an
    /// entry without one is merged.
    pub fn record(&mut self, name: &str, spec: LocationSpec, file: &str) -> Result<(), ScanError> {
        let Some(existing) = self.config.get_mut(name) else {
            self.config.insert(name.to_string(), spec);
            return Ok(());
        };
        if conflicts(existing, &spec) {
            return Err(ScanError::ConfigConflict {
                name: name.to_string(),
                file: file.to_string(),
                old: existing.clone(),
                new: spec,
            });
        }
        existing.merge(spec);
        Ok(())
    }

    pub fn config(&self) -> &BTreeMap<String, LocationSpec> {
        &self.config
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn files(&self) -> &[ScannedFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<ScannedFile> {
        self.files
    }

    /// The consolidated configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        let output = ScanOutput {
            aliases: self.aliases.clone(),
            config: self.config.clone(),
        };
        toml::to_string(&output).map_err(|e| anyhow::anyhow!("Failed to render configuration: {e}"))
    }
}

fn conflicts(old: &LocationSpec, new: &LocationSpec) -> bool {
    fn differs<T: PartialEq>(old: &Option<T>, new: &Option<T>) -> bool {
        matches!((old, new), (Some(a), Some(b)) if a != b)
    }
    differs(&old.path, &new.path)
        || differs(&old.url, &new.url)
        || differs(&old.alias, &new.alias)
        || differs(&old.external, &new.external)
}

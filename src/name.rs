use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::error::RegistryError;

pub const SEPARATOR: char = '.';
pub const WILDCARD: &str = "*";
pub const VIRTUAL_PREFIX: char = '#';
/// Last component of the pseudo-package that lists a wildcard's members.
pub const LISTING_SUFFIX: &str = "__list__";

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("component grammar is a valid regex")
});

/// A validated, normalized dotted package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    /// Validates an already-normalized name.
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        validate(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> Vec<&str> {
        self.0
            .trim_start_matches(VIRTUAL_PREFIX)
            .split(SEPARATOR)
            .collect()
    }

    /// Everything before the last component; empty for top-level names.
    pub fn parent(&self) -> &str {
        self.0.rsplit_once(SEPARATOR).map_or("", |(parent, _)| parent)
    }

    pub fn last(&self) -> &str {
        self.0
            .rsplit_once(SEPARATOR)
            .map_or(self.0.as_str(), |(_, last)| last)
    }

    /// Appends `suffix` (one or more components) to this name.
    pub fn child(&self, suffix: &str) -> PackageName {
        PackageName(join(self.as_str(), suffix))
    }

    /// `a.b.*` or the bare `*`.
    pub fn is_wildcard(&self) -> bool {
        self.last() == WILDCARD
    }

    /// Names starting with `#` are supplied by the host and never fetched.
    pub fn is_virtual(&self) -> bool {
        self.0.starts_with(VIRTUAL_PREFIX)
    }

    pub fn is_listing(&self) -> bool {
        self.last() == LISTING_SUFFIX
    }

    /// For a wildcard name, the prefix it ranges over (empty for `*`).
    pub fn wildcard_base(&self) -> Option<&str> {
        if self.is_wildcard() {
            Some(self.parent())
        } else {
            None
        }
    }

    /// The listing pseudo-package for a wildcard: `a.b.*` -> `a.b.__list__`.
    pub fn listing(&self) -> Option<PackageName> {
        self.wildcard_base()
            .map(|base| PackageName(join(base, LISTING_SUFFIX)))
    }

    /// The last component that is not a wildcard, used as a binding key.
    pub fn binding_key(&self) -> &str {
        if self.is_wildcard() {
            let base = self.parent();
            base.rsplit_once(SEPARATOR)
                .map_or(base, |(_, last)| last)
                .trim_start_matches(VIRTUAL_PREFIX)
        } else {
            self.last().trim_start_matches(VIRTUAL_PREFIX)
        }
    }

    /// The default `/`-separated path for this name, without extension.
    pub fn derived_path(&self) -> String {
        self.components().join("/")
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Expands a leading `.` against `parent`; other names pass through.
pub fn expand_relative(raw: &str, parent: &str) -> String {
    match raw.strip_prefix(SEPARATOR) {
        Some(relative) => join(parent, relative),
        None => raw.to_string(),
    }
}

pub(crate) fn join(parent: &str, suffix: &str) -> String {
    if parent.is_empty() {
        suffix.to_string()
    } else {
        format!("{parent}{SEPARATOR}{suffix}")
    }
}

fn validate(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::invalid_name(name, "name is empty"));
    }
    let body = name.strip_prefix(VIRTUAL_PREFIX).unwrap_or(name);
    let components: Vec<&str> = body.split(SEPARATOR).collect();
    let last = components.len() - 1;
    for (index, component) in components.iter().enumerate() {
        if *component == WILDCARD && index == last {
            continue;
        }
        if !COMPONENT.is_match(component) {
            return Err(RegistryError::invalid_name(
                name,
                format!("component '{component}' is not an identifier"),
            ));
        }
    }
    if name.starts_with(VIRTUAL_PREFIX) && body == WILDCARD {
        return Err(RegistryError::invalid_name(name, "virtual names cannot be wildcards"));
    }
    Ok(())
}

/// Normalizes requested names: separator substitution, relative expansion,
/// alias substitution and grammar validation, in that order.
#[derive(Debug, Clone)]
pub struct NameResolver {
    substitute: char,
}

impl NameResolver {
    pub fn new(substitute: char) -> Self {
        Self { substitute }
    }

    /// Resolves `raw` against an explicit `parent` (`Some("")` is the root).
    /// A relative name without a parent is rejected.
    pub fn resolve(
        &self,
        raw: &str,
        parent: Option<&str>,
        aliases: &HashMap<String, String>,
    ) -> Result<PackageName, RegistryError> {
        let normalized = raw.trim().replace(self.substitute, "_");

        let absolute = match parent {
            Some(parent) => expand_relative(&normalized, parent),
            None if normalized.starts_with(SEPARATOR) => {
                return Err(RegistryError::invalid_name(
                    raw,
                    "relative name used without a parent package",
                ));
            }
            None => normalized,
        };

        let target = aliases.get(&absolute).cloned().unwrap_or(absolute);
        PackageName::parse(&target)
    }

    /// The name of a member discovered under `parent` (a listing entry or
    /// a file in a directory). Aliases do not apply.
    pub fn member(&self, parent: &str, leaf: &str) -> Result<PackageName, RegistryError> {
        PackageName::parse(&join(parent, &leaf.trim().replace(self.substitute, "_")))
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new('-')
    }
}

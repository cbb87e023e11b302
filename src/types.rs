use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Members of an object-shaped package value, keyed by name.
pub type Exports = BTreeMap<String, Value>;

/// The exported value of a package.
///
/// Cloning is cheap and preserves identity, so the same value can be
/// reachable from its own name and from every pattern view above it.
#[derive(Clone)]
pub enum Value {
    /// Plain data, typically read from a package source.
    Data(Arc<serde_json::Value>),
    /// A keyed collection of other values.
    Object(Arc<Exports>),
}

impl Value {
    pub fn data(value: serde_json::Value) -> Self {
        Value::Data(Arc::new(value))
    }

    pub fn object(exports: Exports) -> Self {
        Value::Object(Arc::new(exports))
    }

    /// A listing value: an ordered sequence of sub-package names.
    pub fn list<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::data(serde_json::Value::Array(
            entries
                .into_iter()
                .map(|s| serde_json::Value::String(s.into()))
                .collect(),
        ))
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Data(data) => Some(data),
            Value::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&Exports> {
        match self {
            Value::Object(exports) => Some(exports),
            Value::Data(_) => None,
        }
    }

    /// Member lookup on object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|exports| exports.get(key))
    }

    /// Interprets this value as a listing, if it is an array of strings.
    pub fn as_listing(&self) -> Option<Vec<String>> {
        self.as_data()?
            .as_array()?
            .iter()
            .map(|entry| entry.as_str().map(str::to_string))
            .collect()
    }

    /// Whether both handles refer to the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Data(data) => (**data).clone(),
            Value::Object(exports) => serde_json::Value::Object(
                exports
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::object(Exports::new())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.to_json() == other.to_json()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::data(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_json(), f)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Data(data) => data.serialize(serializer),
            Value::Object(exports) => exports.serialize(serializer),
        }
    }
}

/// Where the source of a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A `/`-separated path, relative to the fetcher's root.
    Path(String),
    /// An absolute network location.
    Url(url::Url),
}

impl Location {
    /// Parses a location string: absolute http(s) URLs become `Url`,
    /// anything else is a path.
    pub fn parse(location: &str) -> Self {
        match parse_network_url(location) {
            Some(url) => Location::Url(url),
            None => Location::Path(location.to_string()),
        }
    }

    /// The directory containing this location.
    pub fn parent(&self) -> Location {
        match self {
            Location::Path(path) => Location::Path(
                path.rsplit_once('/')
                    .map(|(dir, _)| dir.to_string())
                    .unwrap_or_default(),
            ),
            Location::Url(url) => Location::Url(url.join(".").unwrap_or_else(|_| url.clone())),
        }
    }

    /// Joins a `/`-separated relative path onto the directory of this location.
    pub fn sibling(&self, relative: &str) -> Location {
        match self {
            Location::Path(_) => match self.parent() {
                Location::Path(dir) if dir.is_empty() => Location::Path(relative.to_string()),
                Location::Path(dir) => Location::Path(format!("{dir}/{relative}")),
                url => url,
            },
            Location::Url(url) => Location::Url(url.join(relative).unwrap_or_else(|_| url.clone())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(path) => f.write_str(path),
            Location::Url(url) => f.write_str(url.as_str()),
        }
    }
}

/// Returns the URL only when it is absolute and uses a network scheme.
pub fn parse_network_url(candidate: &str) -> Option<url::Url> {
    url::Url::parse(candidate)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
}

/// Location configuration for one name (or one wildcard pattern).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalSpec>,
}

impl LocationSpec {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// The well-formed network URL, if any. It takes precedence over `path`.
    pub fn network_url(&self) -> Option<url::Url> {
        self.url.as_deref().and_then(parse_network_url)
    }

    /// The location this spec points at, ignoring `external`.
    pub fn location(&self) -> Option<Location> {
        self.network_url()
            .map(Location::Url)
            .or_else(|| self.path.clone().map(Location::Path))
    }

    /// Field-by-field merge where the newer entry's fields win.
    pub fn merge(&mut self, newer: LocationSpec) {
        if newer.path.is_some() {
            self.path = newer.path;
        }
        if newer.url.is_some() {
            self.url = newer.url;
        }
        if newer.alias.is_some() {
            self.alias = newer.alias;
        }
        if newer.external.is_some() {
            self.external = newer.external;
        }
    }
}

/// A foreign script that does not use the registry's definition protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSpec {
    /// Fetch locations, tried in order.
    #[serde(with = "one_or_many")]
    pub locations: Vec<String>,
    /// The global symbol the script exports.
    pub export: String,
    /// Registry packages to inject into the script's scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inject: Vec<Injection>,
}

impl ExternalSpec {
    /// Checks that the location list is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.locations.is_empty() {
            return Err("no fetch locations given".to_string());
        }
        if let Some(blank) = self.locations.iter().position(|l| l.trim().is_empty()) {
            return Err(format!("location #{blank} is empty"));
        }
        if self.export.trim().is_empty() {
            return Err("export symbol is empty".to_string());
        }
        Ok(())
    }
}

/// A `(registry name, local symbol)` pair injected into an external script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Injection {
    pub name: String,
    pub symbol: String,
}

mod one_or_many {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match values {
            [single] => serializer.serialize_str(single),
            many => serializer.collect_seq(many),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(single) => vec![single],
            OneOrMany::Many(many) => many,
        })
    }
}

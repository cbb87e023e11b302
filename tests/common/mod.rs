#![allow(dead_code)]

use package_registry::{MemoryFetcher, Registry, RegistrySettings, Value};
use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile};

pub struct TestFile(NamedTempFile);

impl Deref for TestFile {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

pub fn create_toml_test_file(content: &str) -> TestFile {
    let mut temp_file = Builder::new().suffix(".toml").tempfile().unwrap();
    write!(temp_file, "{}", content).unwrap();
    TestFile(temp_file)
}

pub fn memory_fetcher(sources: &[(&str, &str)]) -> Arc<MemoryFetcher> {
    let fetcher = MemoryFetcher::new();
    for (location, source) in sources {
        fetcher.insert(location, source);
    }
    Arc::new(fetcher)
}

/// A registry over in-memory sources, with the fetcher for counting.
pub fn memory_registry(sources: &[(&str, &str)]) -> (Registry, Arc<MemoryFetcher>) {
    memory_registry_with(RegistrySettings::default(), sources)
}

pub fn memory_registry_with(
    settings: RegistrySettings,
    sources: &[(&str, &str)],
) -> (Registry, Arc<MemoryFetcher>) {
    let fetcher = memory_fetcher(sources);
    let registry = Registry::builder()
        .with_settings(settings)
        .with_fetcher(fetcher.clone())
        .build()
        .unwrap();
    (registry, fetcher)
}

pub async fn get_and_assert_ok(registry: &Registry, name: &str) -> Value {
    let result = registry.get(name).await;
    assert!(result.is_ok(), "get('{name}') failed with: {:?}", result.as_ref().err());
    result.unwrap()
}

pub fn data(value: serde_json::Value) -> Value {
    Value::data(value)
}

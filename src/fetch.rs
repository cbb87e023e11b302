use anyhow::Result;
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::types::Location;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Asynchronously fetches package source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the source text at `location`, or fails if there is none.
    async fn fetch(&self, location: &Location) -> Result<String>;

    /// Lists a directory, sorted by name. Transports without a notion of
    /// directories keep the default.
    async fn list(&self, location: &Location) -> Result<Vec<DirEntry>> {
        Err(anyhow::anyhow!("Listing is not supported for {location}"))
    }
}

/// Reads paths relative to a root directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &Location) -> Result<PathBuf> {
        match location {
            Location::Path(path) => {
                let path = path.strip_prefix("file://").unwrap_or(path);
                Ok(self.root.join(path))
            }
            Location::Url(url) => Err(anyhow::anyhow!(
                "File fetcher cannot fetch network location {url}"
            )),
        }
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, location: &Location) -> Result<String> {
        let path = self.resolve(location)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }

    async fn list(&self, location: &Location) -> Result<Vec<DirEntry>> {
        let path = self.resolve(location)?;
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list {}: {e}", path.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort();
        Ok(entries)
    }
}

/// Fetches plain `http://` locations.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, location: &Location) -> Result<String> {
        let Location::Url(url) = location else {
            return Err(anyhow::anyhow!("HTTP fetcher cannot fetch path {location}"));
        };
        if url.scheme() != "http" {
            return Err(anyhow::anyhow!(
                "Unsupported scheme '{}' for {url}: only http is available",
                url.scheme()
            ));
        }
        let uri: hyper::Uri = url.as_str().parse()?;
        let response = self.client.get(uri).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("GET {url} returned {status}"));
        }
        let body = response.into_body().collect().await?.to_bytes();
        Ok(String::from_utf8(body.to_vec())?)
    }
}

/// Paths go to the filesystem, URLs go over HTTP.
#[derive(Clone)]
pub struct StandardFetcher {
    files: FileFetcher,
    http: HttpFetcher,
}

impl StandardFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            files: FileFetcher::new(root),
            http: HttpFetcher::new(),
        }
    }
}

#[async_trait]
impl Fetcher for StandardFetcher {
    async fn fetch(&self, location: &Location) -> Result<String> {
        match location {
            Location::Path(_) => self.files.fetch(location).await,
            Location::Url(_) => self.http.fetch(location).await,
        }
    }

    async fn list(&self, location: &Location) -> Result<Vec<DirEntry>> {
        self.files.list(location).await
    }
}

/// Serves sources from memory and counts fetches per location.
///
/// Directories are implied by the `/`-separated keys of path sources.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    sources: Mutex<BTreeMap<String, String>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, location: &str, source: &str) -> Self {
        self.insert(location, source);
        self
    }

    pub fn insert(&self, location: &str, source: &str) {
        self.sources
            .lock()
            .insert(location.to_string(), source.to_string());
    }

    /// How many times `location` was fetched, successful or not.
    pub fn fetch_count(&self, location: &str) -> usize {
        self.fetches.lock().get(location).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, location: &Location) -> Result<String> {
        let key = location.to_string();
        *self.fetches.lock().entry(key.clone()).or_default() += 1;
        self.sources
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No source at {key}"))
    }

    async fn list(&self, location: &Location) -> Result<Vec<DirEntry>> {
        let Location::Path(dir) = location else {
            return Err(anyhow::anyhow!("Listing is not supported for {location}"));
        };
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir.trim_end_matches('/'))
        };
        let mut entries = BTreeMap::new();
        for key in self.sources.lock().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if is_url_key(key) {
                continue;
            }
            match rest.split_once('/') {
                Some((subdir, _)) => entries.insert(subdir.to_string(), true),
                None => entries.insert(rest.to_string(), false),
            };
        }
        if entries.is_empty() {
            return Err(anyhow::anyhow!("No directory at {dir}"));
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }
}

fn is_url_key(key: &str) -> bool {
    key.contains("://")
}

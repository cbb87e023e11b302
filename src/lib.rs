//! Package Registry
//!
//! An on-demand registry for hierarchical, dotted package names with
//! deduplicated asynchronous loading, dependency joins, wildcard fan-out,
//! and offline scanning and bundling of package sources.

pub use bundle::write_bundle;
pub use config::{ConfigEntry, ConfigStore, RegistrySettings};
pub use error::{RegistryError, ScanError};
pub use fetch::{DirEntry, Fetcher, FileFetcher, HttpFetcher, MemoryFetcher, StandardFetcher};
pub use graph::FileGraph;
pub use loader::{Evaluator, ManifestEvaluator, PackageSource, SourceText};
pub use name::{NameResolver, PackageName};
pub use registry::{Definition, PackageState, Pending, Registry, RegistryBuilder};
pub use scanner::ConfigScanner;
pub use sink::{ExternalScript, GlobalScope, Sink};
pub use types::{Exports, ExternalSpec, Injection, Location, LocationSpec, Value};

pub mod bundle;
pub mod config;
pub mod error;
mod external;
pub mod fetch;
pub mod graph;
pub mod loader;
pub mod name;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod types;
mod views;
mod wildcard;

use thiserror::Error;

use crate::types::LocationSpec;

/// Errors surfaced by the registry.
///
/// Cloneable because a single failed load is delivered to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// A component of the name does not match the identifier grammar.
    #[error("invalid package name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The fetcher could not produce source for any configured location.
    #[error("location not found for '{name}' at {location}: {detail}")]
    LocationNotFound {
        name: String,
        location: String,
        detail: String,
    },

    /// An external module spec is malformed.
    #[error("invalid external spec for '{name}': {reason}")]
    InvalidExternalSpec { name: String, reason: String },

    /// A definition was supplied for a name that already has one.
    #[error("package '{0}' is already defined")]
    AlreadyDefined(String),

    /// The evaluator or sink rejected the loaded source.
    #[error("evaluating '{name}' failed: {message}")]
    Evaluation { name: String, message: String },

    /// The source was evaluated but did not define the requested name.
    #[error("'{name}' was loaded from {location} but never defined there")]
    NotDefined { name: String, location: String },

    /// One of the dependencies of a definition failed to load.
    #[error("dependency '{dependency}' of '{name}' failed: {source}")]
    DependencyFailed {
        name: String,
        dependency: String,
        source: Box<RegistryError>,
    },

    /// The load task went away without completing the name.
    #[error("load of '{0}' was abandoned")]
    Abandoned(String),
}

impl RegistryError {
    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dependency(name: &str, dependency: &str, source: RegistryError) -> Self {
        Self::DependencyFailed {
            name: name.to_string(),
            dependency: dependency.to_string(),
            source: Box::new(source),
        }
    }
}

/// Errors raised by the offline scanner.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Two files configure the same name incompatibly.
    #[error(
        "conflicting configuration for '{name}' in {file}:\n  old: {old:?}\n  new: {new:?}"
    )]
    ConfigConflict {
        name: String,
        file: String,
        old: LocationSpec,
        new: LocationSpec,
    },

    /// A scanned file declares a name relative to whichever package loads it.
    /// Without that package the name has no single meaning.
    #[error("{file}: '{name}' is relative; scanned files must use absolute names")]
    RelativeName { name: String, file: String },
}

use crate::error::RegistryError;
use crate::name::PackageName;
use crate::registry::{Registry, settle};
use crate::sink::ExternalScript;
use crate::types::{ExternalSpec, Location};

impl Registry {
    /// Injected packages are loaded first and concurrently; then each
    /// location is tried in order until one fetches, and the sink turns the
    /// fetched script into the package value.
    pub(crate) async fn load_external(&self, name: PackageName, spec: ExternalSpec) {
        if let Err(reason) = spec.validate() {
            self.fail(
                &name,
                RegistryError::InvalidExternalSpec {
                    name: name.to_string(),
                    reason,
                },
            );
            return;
        }

        let mut injected = Vec::with_capacity(spec.inject.len());
        for injection in &spec.inject {
            match self.resolve(&injection.name, Some(name.parent())) {
                Ok(dependency) => {
                    let handle = tokio::spawn(self.request(dependency.clone()));
                    injected.push((injection.symbol.clone(), dependency, handle));
                }
                Err(e) => {
                    self.fail(&name, e);
                    return;
                }
            }
        }

        let mut bindings = Vec::with_capacity(injected.len());
        let mut failure = None;
        for (symbol, dependency, handle) in injected {
            match settle(handle, &dependency).await {
                Ok(value) => bindings.push((symbol, value)),
                Err(e) => {
                    failure.get_or_insert_with(|| {
                        RegistryError::dependency(name.as_str(), dependency.as_str(), e)
                    });
                }
            }
        }
        if let Some(error) = failure {
            self.fail(&name, error);
            return;
        }

        let mut last_error = None;
        for raw in &spec.locations {
            let location = Location::parse(raw.trim());
            let source = match self.inner.fetcher.fetch(&location).await {
                Ok(source) => source,
                Err(e) => {
                    tracing::debug!("External script for '{name}' not at {location}: {e:#}");
                    last_error = Some((location, e));
                    continue;
                }
            };

            let script = ExternalScript {
                name: &name,
                location: &location,
                source: &source,
                export: spec.export.trim(),
                bindings: &bindings,
            };
            match self.inner.sink.materialize(script) {
                Ok(value) => self.complete(&name, value),
                Err(e) => self.fail(
                    &name,
                    RegistryError::Evaluation {
                        name: name.to_string(),
                        message: format!("{e:#}"),
                    },
                ),
            }
            return;
        }

        if let Some((location, e)) = last_error {
            tracing::warn!("No location of external script '{name}' could be fetched");
            self.fail(
                &name,
                RegistryError::LocationNotFound {
                    name: name.to_string(),
                    location: location.to_string(),
                    detail: format!("{e:#}"),
                },
            );
        }
    }
}

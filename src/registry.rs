use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{ConfigEntry, ConfigStore, RegistrySettings, directory_entry};
use crate::error::RegistryError;
use crate::fetch::{FileFetcher, Fetcher};
use crate::loader::{Evaluator, ManifestEvaluator, SourceText};
use crate::name::{LISTING_SUFFIX, NameResolver, PackageName, SEPARATOR};
use crate::sink::{GlobalScope, Sink};
use crate::types::{Exports, ExternalSpec, Location, LocationSpec, Value, parse_network_url};
use crate::views::PatternViews;

/// The eventual value of a requested package.
pub type Pending = Pin<Box<dyn Future<Output = Result<Value, RegistryError>> + Send + 'static>>;

/// A definition function: receives the package object under construction
/// and the dependency values in declaration order. Returning `None` exports
/// the (possibly mutated) package object.
pub type DefinitionFn = Box<dyn FnOnce(&mut Exports, &[Value]) -> Option<Value> + Send>;

pub enum Definition {
    Value(Value),
    Function(DefinitionFn),
}

impl Definition {
    pub fn function<F>(f: F) -> Self
    where
        F: FnOnce(&mut Exports, &[Value]) -> Option<Value> + Send + 'static,
    {
        Definition::Function(Box::new(f))
    }

    /// Produces the exported value.
    pub fn evaluate(self, dependencies: &[Value]) -> Value {
        match self {
            Definition::Value(value) => value,
            Definition::Function(f) => {
                let mut exports = Exports::new();
                match f(&mut exports, dependencies) {
                    Some(value) => value,
                    None => Value::object(exports),
                }
            }
        }
    }
}

impl From<Value> for Definition {
    fn from(value: Value) -> Self {
        Definition::Value(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Unseen,
    Loading,
    Loaded,
    Failed,
}

type Waiter = oneshot::Sender<Result<Value, RegistryError>>;

#[derive(Default)]
struct Loading {
    waiters: Vec<Waiter>,
    /// A definition has been supplied and will complete the name.
    defined: bool,
}

enum Slot {
    Loading(Loading),
    Loaded(Value),
    Failed(RegistryError),
}

enum Acquisition {
    Fetch(Location),
    External(ExternalSpec),
}

enum Ticket {
    Ready(Result<Value, RegistryError>),
    Waiting(oneshot::Receiver<Result<Value, RegistryError>>, Option<Acquisition>),
}

struct State {
    slots: HashMap<String, Slot>,
    config: ConfigStore,
    aliases: HashMap<String, String>,
    views: PatternViews,
    load_order: HashMap<String, u64>,
    next_order: u64,
}

impl State {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            config: ConfigStore::new(),
            aliases: HashMap::new(),
            views: PatternViews::new(),
            load_order: HashMap::new(),
            next_order: 0,
        }
    }

    /// External spec first, then a well-formed url, then an explicit or
    /// derived path.
    fn plan(&mut self, name: &PackageName, extension: &str) -> Acquisition {
        let spec = self.config.find(name).unwrap_or_default();
        if let Some(external) = spec.external {
            return Acquisition::External(external);
        }
        let location = spec
            .location()
            .unwrap_or_else(|| Location::Path(format!("{}.{extension}", name.derived_path())));
        Acquisition::Fetch(location)
    }
}

pub(crate) struct Inner {
    state: Mutex<State>,
    pub(crate) resolver: NameResolver,
    pub(crate) extension: String,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) sink: Arc<dyn Sink>,
}

/// A process-wide package registry. Clones share the same state.
///
/// Loading spawns Tokio tasks, so requests and definitions with
/// dependencies must be issued from within a Tokio runtime.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<Inner>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolves a raw name against an optional parent (see [`NameResolver`]).
    pub fn resolve(&self, raw: &str, parent: Option<&str>) -> Result<PackageName, RegistryError> {
        let state = self.inner.state.lock();
        self.inner.resolver.resolve(raw, parent, &state.aliases)
    }

    /// Returns the value of a package, loading it first if needed.
    ///
    /// The request is registered immediately; the value is always delivered
    /// asynchronously, even when the package is already loaded. A wildcard
    /// name (`a.b.*`) expands to an object of all listed sub-packages.
    pub fn get(&self, raw: &str) -> Pending {
        match self.resolve(raw, None) {
            Ok(name) => self.request(name),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    /// The current value of a loaded package or pattern view, without
    /// triggering a load.
    pub fn lookup(&self, raw: &str) -> Result<Option<Value>, RegistryError> {
        let name = self.resolve(raw, None)?;
        let state = self.inner.state.lock();
        if name.is_wildcard() {
            return Ok(state.views.view(&name));
        }
        Ok(match state.slots.get(name.as_str()) {
            Some(Slot::Loaded(value)) => Some(value.clone()),
            _ => None,
        })
    }

    pub fn state(&self, raw: &str) -> Result<PackageState, RegistryError> {
        let name = self.resolve(raw, None)?;
        Ok(match self.inner.state.lock().slots.get(name.as_str()) {
            None => PackageState::Unseen,
            Some(Slot::Loading(_)) => PackageState::Loading,
            Some(Slot::Loaded(_)) => PackageState::Loaded,
            Some(Slot::Failed(_)) => PackageState::Failed,
        })
    }

    /// Defines a package whose value needs no dependencies.
    pub fn define_value(&self, raw: &str, value: Value) -> Result<(), RegistryError> {
        self.define(raw, &[], Definition::Value(value))
    }

    /// Defines a package from a function of its dependencies. Dependencies
    /// resolve against the package's parent; the function runs once, after
    /// every dependency has loaded.
    pub fn define_with_dependencies<F>(
        &self,
        raw: &str,
        dependencies: &[&str],
        definition: F,
    ) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Exports, &[Value]) -> Option<Value> + Send + 'static,
    {
        self.define(raw, dependencies, Definition::function(definition))
    }

    pub fn define(
        &self,
        raw: &str,
        dependencies: &[&str],
        definition: Definition,
    ) -> Result<(), RegistryError> {
        let name = self.resolve(raw, None)?;
        if name.is_wildcard() {
            return Err(RegistryError::invalid_name(
                name.as_str(),
                "wildcard patterns cannot be defined",
            ));
        }
        let dependencies = dependencies
            .iter()
            .map(|dependency| self.resolve_dependency(&name, dependency))
            .collect::<Result<Vec<_>, _>>()?;
        self.claim(&name)?;

        if dependencies.is_empty() {
            self.complete(&name, definition.evaluate(&[]));
            return Ok(());
        }

        tracing::debug!(
            "'{name}' waits for {} dependencies: {:?}",
            dependencies.len(),
            dependencies.iter().map(PackageName::as_str).collect::<Vec<_>>()
        );
        let pending: Vec<_> = dependencies
            .into_iter()
            .map(|dependency| {
                let handle = tokio::spawn(self.request(dependency.clone()));
                (dependency, handle)
            })
            .collect();

        let registry = self.clone();
        tokio::spawn(async move {
            let mut values = Vec::with_capacity(pending.len());
            let mut failure = None;
            for (dependency, handle) in pending {
                match settle(handle, &dependency).await {
                    Ok(value) => values.push(value),
                    Err(e) => {
                        failure.get_or_insert_with(|| {
                            RegistryError::dependency(name.as_str(), dependency.as_str(), e)
                        });
                    }
                }
            }
            match failure {
                Some(error) => registry.fail(&name, error),
                None => registry.complete(&name, definition.evaluate(&values)),
            }
        });
        Ok(())
    }

    /// Supplies the value of a virtual (`#`) or otherwise host-provided package.
    pub fn provide(&self, raw: &str, value: Value) -> Result<(), RegistryError> {
        self.define_value(raw, value)
    }

    /// Marks names that something other than a fetch will define, such as a
    /// bundle. Requests for them wait instead of fetching.
    pub fn expect_external<I, S>(&self, names: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in names {
            let name = self.resolve(raw.as_ref(), None)?;
            self.inner
                .state
                .lock()
                .slots
                .entry(name.to_string())
                .or_insert_with(|| Slot::Loading(Loading::default()));
        }
        Ok(())
    }

    /// Sets or merges the location configuration of a name or wildcard.
    /// An `alias` field is registered right away.
    pub fn configure(&self, raw: &str, spec: LocationSpec) -> Result<(), RegistryError> {
        let name = self.resolve(raw, None)?;
        if let Some(external) = &spec.external {
            external
                .validate()
                .map_err(|reason| RegistryError::InvalidExternalSpec {
                    name: name.to_string(),
                    reason,
                })?;
        }
        if let Some(url) = &spec.url
            && parse_network_url(url).is_none()
        {
            tracing::warn!("Ignoring malformed url '{url}' configured for '{name}'");
        }

        let alias = spec.alias.clone();
        let entry = if name.is_wildcard() {
            directory_entry(spec, &self.inner.extension)
        } else {
            ConfigEntry::Static(spec)
        };
        self.inner.state.lock().config.set(name.as_str(), entry);

        match alias {
            Some(alias) if name.is_wildcard() => {
                tracing::warn!("Ignoring alias '{alias}' configured for pattern '{name}'");
                Ok(())
            }
            Some(alias) => self.register_alias(&alias, name.as_str()),
            None => Ok(()),
        }
    }

    /// Installs a configuration entry computed from the name components
    /// below `pattern` (which must be a wildcard).
    pub fn configure_with<F>(&self, pattern: &str, compute: F) -> Result<(), RegistryError>
    where
        F: Fn(&[&str]) -> Option<LocationSpec> + Send + Sync + 'static,
    {
        let name = self.resolve(pattern, None)?;
        if !name.is_wildcard() {
            return Err(RegistryError::invalid_name(
                name.as_str(),
                "computed configuration needs a wildcard pattern",
            ));
        }
        self.inner
            .state
            .lock()
            .config
            .set(name.as_str(), ConfigEntry::computed(compute));
        Ok(())
    }

    /// The configured location of a name, consulting wildcard entries.
    pub fn find_location(&self, raw: &str) -> Result<Option<LocationSpec>, RegistryError> {
        let name = self.resolve(raw, None)?;
        Ok(self.inner.state.lock().config.find(&name))
    }

    /// Registers `alias` as a short name for `target`. The target is
    /// resolved through existing aliases first, so aliases never chain.
    pub fn register_alias(&self, alias: &str, target: &str) -> Result<(), RegistryError> {
        let mut state = self.inner.state.lock();
        let short = self.inner.resolver.resolve(alias, None, &HashMap::new())?;
        let target = self.inner.resolver.resolve(target, None, &state.aliases)?;
        if short == target {
            return Ok(());
        }
        for existing in state.aliases.values_mut() {
            if existing == short.as_str() {
                *existing = target.to_string();
            }
        }
        tracing::debug!("Alias '{short}' -> '{target}'");
        state
            .aliases
            .insert(short.to_string(), target.to_string());
        Ok(())
    }

    pub fn register_aliases<I, A, T>(&self, aliases: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (A, T)>,
        A: AsRef<str>,
        T: AsRef<str>,
    {
        for (alias, target) in aliases {
            self.register_alias(alias.as_ref(), target.as_ref())?;
        }
        Ok(())
    }

    /// Loaded names in completion order, with their sequence numbers.
    pub fn load_order(&self) -> Vec<(String, u64)> {
        let state = self.inner.state.lock();
        let mut order: Vec<_> = state
            .load_order
            .iter()
            .map(|(name, seq)| (name.clone(), *seq))
            .collect();
        order.sort_by_key(|(_, seq)| *seq);
        order
    }

    pub(crate) fn request(&self, name: PackageName) -> Pending {
        if name.is_wildcard() {
            return self.expand_wildcard(name);
        }
        match self.enqueue(&name) {
            Ticket::Ready(result) => Box::pin(async move {
                tokio::task::yield_now().await;
                result
            }),
            Ticket::Waiting(receiver, acquisition) => {
                if let Some(acquisition) = acquisition {
                    self.spawn_acquisition(name.clone(), acquisition);
                }
                Box::pin(async move {
                    receiver
                        .await
                        .unwrap_or_else(|_| Err(RegistryError::Abandoned(name.to_string())))
                })
            }
        }
    }

    fn enqueue(&self, name: &PackageName) -> Ticket {
        let mut state = self.inner.state.lock();
        match state.slots.get_mut(name.as_str()) {
            Some(Slot::Loaded(value)) => Ticket::Ready(Ok(value.clone())),
            Some(Slot::Failed(error)) => Ticket::Ready(Err(error.clone())),
            Some(Slot::Loading(loading)) => {
                let (sender, receiver) = oneshot::channel();
                loading.waiters.push(sender);
                Ticket::Waiting(receiver, None)
            }
            None => {
                let (sender, receiver) = oneshot::channel();
                state.slots.insert(
                    name.to_string(),
                    Slot::Loading(Loading {
                        waiters: vec![sender],
                        defined: false,
                    }),
                );
                let acquisition = if name.is_virtual() {
                    tracing::debug!("Waiting for virtual package '{name}' to be provided");
                    None
                } else {
                    Some(state.plan(name, &self.inner.extension))
                };
                Ticket::Waiting(receiver, acquisition)
            }
        }
    }

    fn spawn_acquisition(&self, name: PackageName, acquisition: Acquisition) {
        let registry = self.clone();
        tokio::spawn(async move {
            match acquisition {
                Acquisition::External(spec) => registry.load_external(name, spec).await,
                Acquisition::Fetch(location) => registry.fetch_and_evaluate(name, location).await,
            }
        });
    }

    async fn fetch_and_evaluate(&self, name: PackageName, location: Location) {
        tracing::debug!("Fetching '{name}' from {location}");
        match self.inner.fetcher.fetch(&location).await {
            Ok(text) => {
                let source = SourceText {
                    origin: Some(name.clone()),
                    location: location.clone(),
                    text,
                };
                if let Err(e) = self.inner.evaluator.evaluate(self, &source) {
                    self.fail(
                        &name,
                        RegistryError::Evaluation {
                            name: name.to_string(),
                            message: format!("{e:#}"),
                        },
                    );
                } else if self.awaiting_definition(&name) {
                    self.fail(
                        &name,
                        RegistryError::NotDefined {
                            name: name.to_string(),
                            location: location.to_string(),
                        },
                    );
                }
            }
            Err(e) if name.is_listing() => {
                tracing::debug!("No listing file for '{name}' at {location} ({e}), listing directory");
                self.synthesize_listing(name, location).await;
            }
            Err(e) => {
                tracing::warn!("Failed to fetch '{name}' from {location}: {e:#}");
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

    fn awaiting_definition(&self, name: &PackageName) -> bool {
        matches!(
            self.inner.state.lock().slots.get(name.as_str()),
            Some(Slot::Loading(Loading { defined: false, .. }))
        )
    }

    /// Marks a name as having a definition on the way.
    fn claim(&self, name: &PackageName) -> Result<(), RegistryError> {
        let mut state = self.inner.state.lock();
        match state.slots.get_mut(name.as_str()) {
            Some(Slot::Loading(loading)) if !loading.defined => {
                loading.defined = true;
                Ok(())
            }
            Some(_) => Err(RegistryError::AlreadyDefined(name.to_string())),
            None => {
                state.slots.insert(
                    name.to_string(),
                    Slot::Loading(Loading {
                        waiters: Vec::new(),
                        defined: true,
                    }),
                );
                Ok(())
            }
        }
    }

    /// Stores the value, publishes it in the pattern views, assigns its
    /// load-order number and releases every waiter.
    pub(crate) fn complete(&self, name: &PackageName, value: Value) {
        let waiters = {
            let mut state = self.inner.state.lock();
            let Some(slot) = state.slots.get_mut(name.as_str()) else {
                tracing::warn!("Ignoring completion of '{name}', which was never requested");
                return;
            };
            let waiters = match std::mem::replace(slot, Slot::Loaded(value.clone())) {
                Slot::Loading(loading) => loading.waiters,
                previous => {
                    *slot = previous;
                    tracing::warn!("Ignoring completion of '{name}', which is not loading");
                    return;
                }
            };
            if !name.is_virtual() && !name.is_listing() {
                state.views.publish(name, &value);
            }
            state.next_order += 1;
            let order = state.next_order;
            state.load_order.insert(name.to_string(), order);
            waiters
        };
        tracing::info!("Loaded package '{name}'");
        for waiter in waiters {
            let _ = waiter.send(Ok(value.clone()));
        }
    }

    /// Moves a loading name to the failed state and propagates the error to
    /// every waiter.
    pub(crate) fn fail(&self, name: &PackageName, error: RegistryError) {
        let waiters = {
            let mut state = self.inner.state.lock();
            let Some(slot) = state.slots.get_mut(name.as_str()) else {
                return;
            };
            match std::mem::replace(slot, Slot::Failed(error.clone())) {
                Slot::Loading(loading) => loading.waiters,
                previous => {
                    *slot = previous;
                    return;
                }
            }
        };
        tracing::warn!("Package '{name}' failed: {error}");
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Resolves a dependency of `target`. A relative dependency without any
    /// configuration of its own inherits a location next to `target`.
    fn resolve_dependency(
        &self,
        target: &PackageName,
        raw: &str,
    ) -> Result<PackageName, RegistryError> {
        let dependency = self.resolve(raw, Some(target.parent()))?;
        if raw.trim_start().starts_with(SEPARATOR) {
            self.inherit_location(target, &dependency);
        }
        Ok(dependency)
    }

    fn inherit_location(&self, target: &PackageName, dependency: &PackageName) {
        let mut state = self.inner.state.lock();
        let Some(target_location) = state.config.find(target).and_then(|spec| spec.location())
        else {
            return;
        };

        let suffix = match target.parent() {
            "" => Some(dependency.as_str()),
            parent => dependency
                .as_str()
                .strip_prefix(parent)
                .and_then(|rest| rest.strip_prefix(SEPARATOR)),
        };
        let Some(suffix) = suffix else {
            return;
        };
        let mut components: Vec<&str> = suffix.split(SEPARATOR).collect();

        let extension = target_location
            .to_string()
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_else(|| self.inner.extension.clone());

        let configured = if dependency.is_wildcard() {
            components.pop();
            components.push(LISTING_SUFFIX);
            match dependency.listing() {
                Some(listing) => listing,
                None => return,
            }
        } else {
            dependency.clone()
        };
        if state.config.find(&configured).is_some_and(|spec| places(&spec)) {
            return;
        }

        let relative = format!("{}.{extension}", components.join("/"));
        let spec = match target_location.sibling(&relative) {
            Location::Path(path) => LocationSpec::path(path),
            Location::Url(url) => LocationSpec::url(url.to_string()),
        };
        tracing::debug!("'{configured}' inherits {spec:?} from '{target}'");
        state.config.set(configured.as_str(), spec.into());
    }

    pub(crate) fn configure_if_unset(&self, name: &PackageName, location: Location) {
        let mut state = self.inner.state.lock();
        if state.config.find(name).is_some_and(|spec| places(&spec)) {
            return;
        }
        let spec = match location {
            Location::Path(path) => LocationSpec::path(path),
            Location::Url(url) => LocationSpec::url(url.to_string()),
        };
        state.config.set(name.as_str(), spec.into());
    }
}

/// Whether a configuration entry says where the package lives. An entry
/// carrying only an alias does not.
fn places(spec: &LocationSpec) -> bool {
    spec.location().is_some() || spec.external.is_some()
}

/// Awaits a spawned request, mapping a lost task to [`RegistryError::Abandoned`].
pub(crate) async fn settle(
    handle: JoinHandle<Result<Value, RegistryError>>,
    name: &PackageName,
) -> Result<Value, RegistryError> {
    handle
        .await
        .unwrap_or_else(|_| Err(RegistryError::Abandoned(name.to_string())))
}

/// Builder for configuring and creating a Registry
pub struct RegistryBuilder {
    settings: RegistrySettings,
    fetcher: Option<Arc<dyn Fetcher>>,
    evaluator: Arc<dyn Evaluator>,
    sink: Arc<dyn Sink>,
}

impl RegistryBuilder {
    fn new() -> Self {
        Self {
            settings: RegistrySettings::default(),
            fetcher: None,
            evaluator: Arc::new(ManifestEvaluator),
            sink: Arc::new(GlobalScope::new()),
        }
    }

    pub fn with_settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Defaults to a [`FileFetcher`] rooted at the working directory.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Defaults to [`ManifestEvaluator`].
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Defaults to a fresh [`GlobalScope`].
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the Registry, applying seed configuration, aliases and
    /// predefined names from the settings.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let RegistrySettings {
            extension,
            separator_substitute,
            config,
            aliases,
            predefined,
        } = self.settings;

        let registry = Registry {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                resolver: NameResolver::new(separator_substitute),
                extension,
                fetcher: self
                    .fetcher
                    .unwrap_or_else(|| Arc::new(FileFetcher::new("."))),
                evaluator: self.evaluator,
                sink: self.sink,
            }),
        };

        for (name, spec) in config {
            registry.configure(&name, spec)?;
        }
        registry.register_aliases(aliases)?;
        registry.expect_external(predefined)?;
        Ok(registry)
    }
}

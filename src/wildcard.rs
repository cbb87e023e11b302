use crate::error::RegistryError;
use crate::name::{LISTING_SUFFIX, PackageName, SEPARATOR, WILDCARD};
use crate::registry::{Pending, Registry, settle};
use crate::types::{Exports, Location, Value};

impl Registry {
    /// Resolves `a.b.*` through its listing `a.b.__list__`. Entries ending
    /// in `.*` are nested wildcards.
    pub(crate) fn expand_wildcard(&self, name: PackageName) -> Pending {
        let Some(listing) = name.listing() else {
            return Box::pin(async move {
                Err(RegistryError::invalid_name(name.as_str(), "not a wildcard"))
            });
        };
        let base = name.wildcard_base().unwrap_or_default().to_string();
        let listing_request = self.request(listing.clone());
        let registry = self.clone();

        Box::pin(async move {
            let entries = listing_request
                .await
                .map_err(|e| RegistryError::dependency(name.as_str(), listing.as_str(), e))?;
            let entries = entries.as_listing().ok_or_else(|| RegistryError::Evaluation {
                name: listing.to_string(),
                message: "a listing must be a sequence of names".to_string(),
            })?;

            let mut members = Vec::with_capacity(entries.len());
            for entry in &entries {
                let member = registry.inner.resolver.member(&base, entry)?;
                let key = member.binding_key().to_string();
                let handle = tokio::spawn(registry.request(member.clone()));
                members.push((key, member, handle));
            }

            let mut exports = Exports::new();
            let mut failure = None;
            for (key, member, handle) in members {
                match settle(handle, &member).await {
                    Ok(value) => {
                        exports.insert(key, value);
                    }
                    Err(e) => {
                        failure.get_or_insert_with(|| {
                            RegistryError::dependency(name.as_str(), member.as_str(), e)
                        });
                    }
                }
            }
            match failure {
                Some(error) => Err(error),
                None => Ok(Value::object(exports)),
            }
        })
    }

    /// Builds a listing from the directory next to its missing listing file.
    /// Files with the registry extension become members, subdirectories
    /// become nested wildcards. Every member gets a location configuration
    /// unless it already has one.
    pub(crate) async fn synthesize_listing(&self, name: PackageName, location: Location) {
        let directory = location.parent();
        let entries = match self.inner.fetcher.list(&directory).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("No listing available for '{name}' at {directory}: {e:#}");
                self.fail(
                    &name,
                    RegistryError::LocationNotFound {
                        name: name.to_string(),
                        location: directory.to_string(),
                        detail: format!("{e:#}"),
                    },
                );
                return;
            }
        };

        let base = name.parent().to_string();
        let suffix = format!(".{}", self.inner.extension);
        let mut listed = Vec::new();
        let mut nested = Vec::new();

        for entry in entries {
            let leaf = if entry.is_dir {
                entry.name.as_str()
            } else {
                match entry.name.strip_suffix(&suffix) {
                    Some(stem) if stem != LISTING_SUFFIX => stem,
                    _ => continue,
                }
            };
            let member = match self.inner.resolver.member(&base, leaf) {
                Ok(member) => member,
                Err(e) => {
                    tracing::debug!("Skipping '{}' in {directory}: {e}", entry.name);
                    continue;
                }
            };

            if entry.is_dir {
                let child_listing = member.child(LISTING_SUFFIX);
                let relative = format!("{}/{LISTING_SUFFIX}{suffix}", entry.name);
                self.configure_if_unset(&child_listing, location.sibling(&relative));
                nested.push((
                    child_listing.clone(),
                    tokio::spawn(self.request(child_listing)),
                ));
                listed.push(format!("{}{SEPARATOR}{WILDCARD}", member.last()));
            } else {
                self.configure_if_unset(&member, location.sibling(&entry.name));
                listed.push(member.last().to_string());
            }
        }

        let mut failure = None;
        for (child_listing, handle) in nested {
            if let Err(e) = settle(handle, &child_listing).await {
                failure.get_or_insert_with(|| {
                    RegistryError::dependency(name.as_str(), child_listing.as_str(), e)
                });
            }
        }
        if let Some(error) = failure {
            self.fail(&name, error);
            return;
        }

        tracing::debug!("Synthesized listing '{name}': {listed:?}");
        if let Err(e) = self.define_value(name.as_str(), Value::list(listed)) {
            self.fail(&name, e);
        }
    }
}

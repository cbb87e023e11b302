use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::FileGraph;
use crate::loader::SourceText;
use crate::name::{LISTING_SUFFIX, PackageName, SEPARATOR, WILDCARD, join};
use crate::registry::Registry;
use crate::types::{Location, LocationSpec, Value};

pub const SOURCE_MARKER: &str = "### source: ";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Prelude {
    bundle: BundleHeader,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    config: BTreeMap<String, LocationSpec>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BundleHeader {
    #[serde(default)]
    predefined: Vec<String>,
    /// Listings for the wildcards the bundled files require.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    listings: BTreeMap<String, Vec<String>>,
}

/// Renders the bundle for a scanned file graph: a TOML prelude, then every
/// file in build order behind a [`SOURCE_MARKER`] line.
///
/// ```text
/// [bundle]
/// predefined = ["app.main", "app.plugins.__list__", "app.plugins.one"]
///
/// [bundle.listings]
/// "app.plugins.__list__" = ["one"]
///
/// [config."app.main"]
/// path = "src/app/main.toml"
/// ### source: src/app/plugins/one.toml
/// ...
/// ### source: src/app/main.toml
/// ...
/// ```
pub fn write_bundle(graph: &FileGraph) -> Result<String> {
    let listings = bundled_listings(graph);
    let mut predefined: Vec<String> = graph.declared().into_iter().map(str::to_string).collect();
    predefined.extend(listings.keys().cloned());
    predefined.sort_unstable();

    let prelude = Prelude {
        bundle: BundleHeader {
            predefined,
            listings,
        },
        aliases: graph.aliases().clone(),
        config: graph.config().clone(),
    };
    let mut output = toml::to_string(&prelude)
        .map_err(|e| anyhow::anyhow!("Failed to render bundle prelude: {e}"))?;

    for file in graph.build_order() {
        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(SOURCE_MARKER);
        output.push_str(&file.path.to_string_lossy().replace('\\', "/"));
        output.push('\n');
        output.push_str(&file.source);
    }
    Ok(output)
}

/// Listings for every wildcard required by a bundled file, built from the
/// declared names under its prefix. Nested wildcards get listings too, so
/// expanding any of them never reaches the fetcher.
fn bundled_listings(graph: &FileGraph) -> BTreeMap<String, Vec<String>> {
    let declared = graph.declared();
    let mut bases: Vec<String> = graph
        .build_order()
        .flat_map(|file| file.requires.iter())
        .filter_map(|required| PackageName::parse(required).ok())
        .filter_map(|name| name.wildcard_base().map(str::to_string))
        .collect();

    let mut listings = BTreeMap::new();
    while let Some(base) = bases.pop() {
        let listing = join(&base, LISTING_SUFFIX);
        if listings.contains_key(&listing) || declared.contains(&listing.as_str()) {
            continue;
        }
        let prefix = match base.as_str() {
            "" => String::new(),
            base => format!("{base}{SEPARATOR}"),
        };
        let mut entries = BTreeSet::new();
        for name in &declared {
            let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once(SEPARATOR) {
                None if rest != LISTING_SUFFIX => {
                    entries.insert(rest.to_string());
                }
                None => {}
                Some((first, _)) => {
                    entries.insert(format!("{first}{SEPARATOR}{WILDCARD}"));
                    bases.push(join(&base, first));
                }
            }
        }
        tracing::debug!("Bundling listing '{listing}' with {} entries", entries.len());
        listings.insert(listing, entries.into_iter().collect());
    }
    listings
}

/// The sections of a bundle: the prelude text, then `(path, source)` pairs.
fn split_sections(text: &str) -> (String, Vec<(String, String)>) {
    let mut prelude = String::new();
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in text.split_inclusive('\n') {
        if let Some(path) = line.strip_prefix(SOURCE_MARKER) {
            sections.push((path.trim().to_string(), String::new()));
            continue;
        }
        match sections.last_mut() {
            Some((_, source)) => source.push_str(line),
            None => prelude.push_str(line),
        }
    }
    (prelude, sections)
}

impl Registry {
    /// Loads a bundle produced by [`write_bundle`]. Declared names are marked
    /// as predefined first so nothing in the bundle is fetched. Bundled
    /// listings are defined next, then every section is evaluated in order.
    pub fn load_bundle(&self, text: &str) -> Result<()> {
        let (prelude, sections) = split_sections(text);
        let prelude: Prelude = toml::from_str(&prelude)
            .map_err(|e| anyhow::anyhow!("Failed to parse bundle prelude: {e}"))?;

        self.expect_external(&prelude.bundle.predefined)?;
        for (listing, entries) in prelude.bundle.listings {
            self.define_value(&listing, Value::list(entries))?;
        }
        for (name, spec) in prelude.config {
            self.configure(&name, spec)?;
        }
        self.register_aliases(prelude.aliases)?;

        for (path, text) in sections {
            tracing::debug!("Evaluating bundled source {path}");
            let source = SourceText {
                origin: None,
                location: Location::Path(path),
                text,
            };
            self.inner.evaluator.evaluate(self, &source)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_split_on_markers() {
        let text = "[bundle]\npredefined = []\n### source: a.toml\n[package.a]\n### source: b.toml\n[package.b]\n";
        let (prelude, sections) = split_sections(text);
        assert_eq!(prelude, "[bundle]\npredefined = []\n");
        assert_eq!(
            sections,
            vec![
                ("a.toml".to_string(), "[package.a]\n".to_string()),
                ("b.toml".to_string(), "[package.b]\n".to_string()),
            ]
        );
    }
}

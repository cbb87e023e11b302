use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::name::{NameResolver, PackageName};
use crate::scanner::{ConfigScanner, ScannedFile};
use crate::types::LocationSpec;

/// Dependencies between scanned package source files. An edge runs from
/// the file declaring a package to every file requiring it.
pub struct FileGraph {
    graph: DiGraph<ScannedFile, Edge>,
    providers: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
    config: BTreeMap<String, LocationSpec>,
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum Edge {
    /// The dependent requires this exact name.
    Requires(String),
    /// The dependent requires a wildcard covering a declared name.
    Pattern(String),
}

impl FileGraph {
    /// Create a new GraphBuilder
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub(crate) fn build(scanner: ConfigScanner) -> Result<Self> {
        let config = scanner.config().clone();
        let aliases = scanner.aliases().clone();
        let mut graph = DiGraph::<ScannedFile, Edge>::new();
        let mut providers = HashMap::<String, NodeIndex>::new();

        for file in scanner.into_files() {
            let declares = file.declares.clone();
            let index = graph.add_node(file);
            for name in declares {
                providers.insert(name, index);
            }
        }

        let mut edges = Vec::new();
        for dependent in graph.node_indices() {
            for required in &graph[dependent].requires {
                let matches = providers_for(&providers, required);
                if matches.is_empty() {
                    tracing::warn!(
                        "'{}' requires '{required}', which no scanned file declares",
                        graph[dependent].path.display()
                    );
                }
                for (provider, edge) in matches {
                    if provider != dependent {
                        edges.push((provider, dependent, edge));
                    }
                }
            }
        }
        for (provider, dependent, edge) in edges {
            graph.update_edge(provider, dependent, edge);
        }

        let order = petgraph::algo::toposort(&graph, None).map_err(|cycle| {
            anyhow::anyhow!(
                "Circular dependency detected involving '{}'",
                graph[cycle.node_id()].path.display()
            )
        })?;

        Ok(Self {
            graph,
            providers,
            order,
            config,
            aliases,
        })
    }

    /// Files ordered so that every file comes after the files it requires.
    pub fn build_order(&self) -> impl Iterator<Item = &ScannedFile> {
        self.order.iter().map(|index| &self.graph[*index])
    }

    /// Every declared package name, sorted.
    pub fn declared(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn provider(&self, name: &str) -> Option<&ScannedFile> {
        self.providers.get(name).map(|index| &self.graph[*index])
    }

    /// Files that the file declaring `name` depends on.
    pub fn dependencies_of(&self, name: &str) -> Vec<&ScannedFile> {
        let Some(index) = self.providers.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(*index, petgraph::Direction::Incoming)
            .map(|provider| &self.graph[provider])
            .collect()
    }

    pub fn config(&self) -> &BTreeMap<String, LocationSpec> {
        &self.config
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Write the graph to a DOT file
    pub fn write_dot_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.dot())
            .map_err(|e| anyhow::anyhow!("Failed to write DOT file: {e}"))
    }

    pub fn dot(&self) -> String {
        let mut output = String::from("digraph PackageFiles {\n");
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [fontname=\"Arial\", fontsize=10, shape=box, style=\"rounded,filled\"];\n");
        output.push_str("  edge [fontname=\"Arial\", fontsize=9];\n");

        for index in self.graph.node_indices() {
            let file = &self.graph[index];
            let color = if file.requires.is_empty() { "lightgreen" } else { "lightblue" };
            output.push_str(&format!(
                "  {} [label=\"{}\\n({})\", fillcolor={color}];\n",
                index.index(),
                file.path.display(),
                file.declares.join(", ")
            ));
        }

        for edge in self.graph.edge_references() {
            let attrs = match edge.weight() {
                Edge::Requires(name) => format!("[color=blue, style=solid, label=\"{name}\"]"),
                Edge::Pattern(pattern) => format!("[color=red, style=dashed, label=\"{pattern}\"]"),
            };
            output.push_str(&format!(
                "  {} -> {} {attrs};\n",
                edge.source().index(),
                edge.target().index()
            ));
        }

        output.push_str("}\n");
        output
    }
}

impl std::fmt::Debug for FileGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let files: Vec<_> = self
            .build_order()
            .map(|file| (file.path.display().to_string(), &file.declares))
            .collect();
        let edges: Vec<String> = self
            .graph
            .edge_references()
            .map(|edge| {
                format!(
                    "{} -> {} ({:?})",
                    self.graph[edge.source()].path.display(),
                    self.graph[edge.target()].path.display(),
                    edge.weight()
                )
            })
            .collect();
        f.debug_struct("FileGraph")
            .field("files", &files)
            .field("edges", &edges)
            .finish()
    }
}

fn providers_for(
    providers: &HashMap<String, NodeIndex>,
    required: &str,
) -> Vec<(NodeIndex, Edge)> {
    let pattern = PackageName::parse(required).ok().and_then(|name| {
        name.wildcard_base().map(|base| match base {
            "" => String::new(),
            base => format!("{base}."),
        })
    });
    match pattern {
        Some(prefix) => providers
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, index)| (*index, Edge::Pattern(required.to_string())))
            .collect(),
        None => providers
            .get(required)
            .map(|index| vec![(*index, Edge::Requires(required.to_string()))])
            .unwrap_or_default(),
    }
}

/// Builder for constructing a FileGraph
pub struct GraphBuilder {
    paths: Vec<PathBuf>,
    resolver: NameResolver,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            resolver: NameResolver::default(),
        }
    }

    /// Add a package source file
    pub fn load_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_resolver(mut self, resolver: NameResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Scan every file and build the FileGraph
    pub fn build(self) -> Result<FileGraph> {
        let mut scanner = ConfigScanner::with_resolver(self.resolver);
        for path in &self.paths {
            scanner.scan_file(path)?;
        }
        FileGraph::build(scanner)
    }
}

//! Module dependency graph.
//!
//! Built by a depth-first pre-order traversal from the declared entries, in
//! import order. A module's traversal index is its position in that order and
//! is the key every later merge step sorts by.

use super::cache::ModuleCache;
use super::resolve::{Resolution, Resolver};
use crate::config::PipelineConfig;
use crate::error::BuildError;
use crate::imports::{scan_imports, scan_style_urls};
use packline_util::fs::{normalize, relative_slash};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Coarse module type, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Script,
    Style,
    Image,
    Other,
}

impl ModuleKind {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => Self::Script,
            "css" | "scss" | "sass" | "less" => Self::Style,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "webp" | "ico" => Self::Image,
            _ => Self::Other,
        }
    }

    /// Whether output of this kind is an emitted file rather than code.
    #[must_use]
    pub fn is_asset(&self) -> bool {
        matches!(self, Self::Image | Self::Other)
    }
}

/// What a specifier resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyTarget {
    /// Module id.
    Module(String),
    /// Global variable provided by the page.
    External(String),
    Ignored,
}

/// A resolved reference from one module to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written in the importer.
    pub specifier: String,
    pub target: DependencyTarget,
    /// Referenced through `import()`.
    pub dynamic: bool,
}

/// A module in the dependency graph.
#[derive(Debug, Clone)]
pub struct Module {
    /// Root-relative path with forward slashes.
    pub id: String,
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub source: Arc<Vec<u8>>,
    pub dependencies: Vec<Dependency>,
    /// Traversal index.
    pub index: usize,
}

impl Module {
    /// Source as text, replacing invalid UTF-8.
    #[must_use]
    pub fn source_text(&self) -> String {
        String::from_utf8_lossy(&self.source).into_owned()
    }

    /// Look up the resolution of `specifier`.
    #[must_use]
    pub fn dependency(&self, specifier: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.specifier == specifier)
    }

    /// Ids of modules this one references, in import order.
    pub fn module_dependencies(&self) -> impl Iterator<Item = (&str, bool)> {
        self.dependencies.iter().filter_map(|d| match &d.target {
            DependencyTarget::Module(id) => Some((id.as_str(), d.dynamic)),
            _ => None,
        })
    }
}

/// Entry point: a bundle name and the indices of its modules.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub modules: Vec<usize>,
}

/// The module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// All modules, in traversal order.
    modules: Vec<Module>,
    by_id: FxHashMap<String, usize>,
    entries: Vec<Entry>,
}

impl ModuleGraph {
    /// Number of modules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Module> {
        self.by_id.get(id).map(|&i| &self.modules[i])
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Modules reachable from `start` through static references, in
    /// depth-first pre-order.
    #[must_use]
    pub fn static_closure(&self, start: &[usize]) -> Vec<usize> {
        self.closure(start, false)
    }

    /// Like [`Self::static_closure`] but also following `import()`.
    #[must_use]
    pub fn full_closure(&self, start: &[usize]) -> Vec<usize> {
        self.closure(start, true)
    }

    fn closure(&self, start: &[usize], follow_dynamic: bool) -> Vec<usize> {
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack: Vec<usize> = start.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            if !seen.insert(index) {
                continue;
            }
            order.push(index);
            let module = &self.modules[index];
            let next: Vec<usize> = module
                .module_dependencies()
                .filter(|(_, dynamic)| follow_dynamic || !dynamic)
                .filter_map(|(id, _)| self.index_of(id))
                .collect();
            stack.extend(next.into_iter().rev());
        }
        order
    }
}

enum LoadError {
    Io(io::Error),
    Build(BuildError),
}

/// Builds a [`ModuleGraph`], reusing cached modules whose file is unchanged.
pub struct GraphBuilder<'a> {
    root: &'a Path,
    config: &'a PipelineConfig,
    resolver: &'a Resolver,
    cache: Option<&'a ModuleCache>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(root: &'a Path, config: &'a PipelineConfig, resolver: &'a Resolver) -> Self {
        Self {
            root,
            config,
            resolver,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: &'a ModuleCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Traverse from every entry and load each reachable module once.
    pub fn build(&self) -> Result<ModuleGraph, BuildError> {
        let mut graph = ModuleGraph::default();
        let mut reused = 0usize;

        for (name, paths) in &self.config.entry {
            let mut entry = Entry {
                name: name.clone(),
                modules: Vec::new(),
            };
            for rel in paths {
                let path = normalize(&self.root.join(rel));
                if !path.is_file() {
                    return Err(BuildError::EntryNotFound { path: rel.clone() });
                }
                let index = self.visit(&mut graph, path, &mut reused)?;
                entry.modules.push(index);
            }
            graph.entries.push(entry);
        }

        debug!(
            modules = graph.len(),
            reused,
            "module graph built"
        );
        Ok(graph)
    }

    /// Depth-first pre-order from `start`; returns the index of `start`.
    fn visit(
        &self,
        graph: &mut ModuleGraph,
        start: PathBuf,
        reused: &mut usize,
    ) -> Result<usize, BuildError> {
        let start_id = self.module_id(&start);
        let mut stack: Vec<(PathBuf, Option<String>)> = vec![(start, None)];

        while let Some((path, referenced_from)) = stack.pop() {
            let id = self.module_id(&path);
            if graph.by_id.contains_key(&id) {
                continue;
            }

            let mut module = match self.cache.and_then(|c| c.module(&path)) {
                Some(module) => {
                    *reused += 1;
                    module
                }
                None => self.load(&path, id.clone()).map_err(|e| match e {
                    LoadError::Build(err) => err,
                    LoadError::Io(err) => match &referenced_from {
                        Some(from) if err.kind() == io::ErrorKind::NotFound => {
                            BuildError::UnresolvedDependency {
                                path: id.clone(),
                                referenced_from: from.clone(),
                            }
                        }
                        _ => BuildError::io(&path, err),
                    },
                })?,
            };

            module.index = graph.modules.len();
            let children: Vec<PathBuf> = module
                .module_dependencies()
                .map(|(dep, _)| self.path_of(dep))
                .collect();
            for child in children.into_iter().rev() {
                stack.push((child, Some(id.clone())));
            }
            graph.by_id.insert(id, module.index);
            graph.modules.push(module);
        }

        graph
            .index_of(&start_id)
            .ok_or_else(|| BuildError::Internal(format!("entry {start_id} missing from graph")))
    }

    /// Read a module and resolve its references.
    fn load(&self, path: &Path, id: String) -> Result<Module, LoadError> {
        let source = std::fs::read(path).map_err(LoadError::Io)?;
        let kind = ModuleKind::from_path(path);

        let specifiers: Vec<(String, bool)> = match kind {
            ModuleKind::Script => scan_imports(&String::from_utf8_lossy(&source))
                .into_iter()
                .map(|spec| (spec.raw, spec.kind.is_dynamic()))
                .collect(),
            ModuleKind::Style => scan_style_urls(&String::from_utf8_lossy(&source))
                .into_iter()
                .map(|spec| (spec, false))
                .collect(),
            ModuleKind::Image | ModuleKind::Other => Vec::new(),
        };

        let mut dependencies = Vec::with_capacity(specifiers.len());
        for (specifier, dynamic) in specifiers {
            let target = match self.resolver.resolve(&specifier, path) {
                Ok(Resolution::File(file)) => DependencyTarget::Module(self.module_id(&file)),
                Ok(Resolution::External(global)) => DependencyTarget::External(global),
                Ok(Resolution::Ignored) => DependencyTarget::Ignored,
                Err(e) => {
                    let missing = e
                        .attempted
                        .as_deref()
                        .map_or_else(|| specifier.clone(), |p| self.module_id(p));
                    return Err(LoadError::Build(BuildError::UnresolvedDependency {
                        path: missing,
                        referenced_from: id,
                    }));
                }
            };
            dependencies.push(Dependency {
                specifier,
                target,
                dynamic,
            });
        }

        Ok(Module {
            id,
            path: path.to_path_buf(),
            kind,
            source: Arc::new(source),
            dependencies,
            index: 0,
        })
    }

    fn module_id(&self, path: &Path) -> String {
        relative_slash(self.root, path)
    }

    fn path_of(&self, id: &str) -> PathBuf {
        normalize(&self.root.join(id))
    }
}

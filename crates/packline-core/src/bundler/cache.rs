//! Module cache for incremental rebuilds.
//!
//! Holds the loaded module and its chain output for every module of the last
//! successful build, with a reverse index (module to importers) for
//! invalidation.

use super::chain::ModuleOutput;
use super::graph::{Module, ModuleGraph, ModuleKind};
use crate::css::sass::is_sass_file;
use packline_util::fs::{normalize, relative_slash};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
    module: Module,
    output: Arc<ModuleOutput>,
}

/// Cache of loaded and transformed modules, keyed by module id.
#[derive(Debug)]
pub struct ModuleCache {
    root: PathBuf,
    entries: FxHashMap<String, CacheEntry>,
    /// Reverse index: module id to the ids of modules importing it.
    importers: FxHashMap<String, FxHashSet<String>>,
}

impl ModuleCache {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: FxHashMap::default(),
            importers: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached module loaded from `path`.
    #[must_use]
    pub fn module(&self, path: &Path) -> Option<Module> {
        self.entries
            .get(&self.id_of(path))
            .map(|entry| entry.module.clone())
    }

    /// Cached chain output of module `id`.
    #[must_use]
    pub fn output(&self, id: &str) -> Option<Arc<ModuleOutput>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.output))
    }

    /// Replace the cache contents with the modules of a successful build.
    pub fn store(&mut self, graph: &ModuleGraph, outputs: &[Arc<ModuleOutput>]) {
        self.entries.clear();
        self.importers.clear();
        for (module, output) in graph.modules().iter().zip(outputs) {
            for (dep, _) in module.module_dependencies() {
                self.importers
                    .entry(dep.to_string())
                    .or_default()
                    .insert(module.id.clone());
            }
            self.entries.insert(
                module.id.clone(),
                CacheEntry {
                    module: module.clone(),
                    output: Arc::clone(output),
                },
            );
        }
    }

    /// Drop changed modules and their direct importers.
    ///
    /// A changed stylesheet that is not itself a module (a Sass partial) drops
    /// every cached style module. Returns the number of entries removed.
    pub fn invalidate(&mut self, changed: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in changed {
            let id = self.id_of(path);
            if self.entries.remove(&id).is_some() {
                removed += 1;
                let importers = self.importers.remove(&id).unwrap_or_default();
                for importer in importers {
                    if self.entries.remove(&importer).is_some() {
                        removed += 1;
                    }
                }
            } else if is_sass_file(path) || path.extension().is_some_and(|e| e == "css") {
                let styles: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|(_, e)| e.module.kind == ModuleKind::Style)
                    .map(|(id, _)| id.clone())
                    .collect();
                for style in styles {
                    self.entries.remove(&style);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(
                changed = changed.len(),
                removed,
                "module cache entries invalidated"
            );
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.importers.clear();
    }

    fn id_of(&self, path: &Path) -> String {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        };
        relative_slash(&self.root, &absolute)
    }
}

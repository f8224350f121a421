//! The module transformation pipeline.
//!
//! ## Architecture
//!
//! 1. **Graph** - resolve and load every module reachable from the entries
//! 2. **Dispatch** - match each module against the rule set
//! 3. **Transform** - run each module's chain, in parallel
//! 4. **Assemble** - group outputs into bundles and merge side artifacts
//! 5. **Passes** - constant injection, case guard, CSS extraction, HTML,
//!    minification, icons
//! 6. **Seal** - render source maps and freeze the file table
//!
//! ## Usage
//!
//! ```ignore
//! use packline_core::{Mode, Pipeline, PipelineConfig, ProcessConfig};
//!
//! let config = PipelineConfig::for_mode(Mode::Production, &ProcessConfig::default());
//! let build = Pipeline::new(root, config)?.build()?;
//! ```

pub mod assemble;
pub mod build;
pub mod cache;
pub mod chain;
pub mod graph;
pub mod naming;
pub mod plugins;
pub mod resolve;
pub mod rules;
pub mod runtime;
pub mod sourcemap;
pub mod steps;

pub use assemble::Assembler;
pub use build::{content_type, Build, BundleKind};
pub use cache::ModuleCache;
pub use chain::{
    ChainEnv, ChainExecutor, ModuleValue, StepContext, StepError, StepRegistry, TransformStep,
};
pub use graph::{GraphBuilder, Module, ModuleGraph, ModuleKind};
pub use plugins::{Pass, PluginOrchestrator};
pub use resolve::Resolver;
pub use rules::RuleSet;

use crate::config::PipelineConfig;
use crate::error::BuildError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::info;

/// A configured pipeline for one project root.
///
/// Runs are serialized; the module cache carries transformed modules from
/// one run to the next.
pub struct Pipeline {
    root: PathBuf,
    config: Arc<PipelineConfig>,
    registry: StepRegistry,
    rules: RuleSet,
    resolver: Resolver,
    env: ChainEnv,
    cache: Mutex<ModuleCache>,
}

impl Pipeline {
    /// Pipeline with the built-in steps.
    pub fn new(root: &Path, config: PipelineConfig) -> Result<Self, BuildError> {
        Self::with_registry(root, config, StepRegistry::with_builtins())
    }

    /// Pipeline whose rules may refer to the steps of `registry`.
    pub fn with_registry(
        root: &Path,
        config: PipelineConfig,
        registry: StepRegistry,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        let root = dunce::canonicalize(root).map_err(|e| BuildError::io(root, e))?;
        let rules = RuleSet::compile(&config.rules, &registry)?;
        let resolver = Resolver::new(&root, &config)?;
        let env = ChainEnv::from_config(&root, &config);
        let cache = Mutex::new(ModuleCache::new(&root));
        Ok(Self {
            root,
            config: Arc::new(config),
            registry,
            rules,
            resolver,
            env,
            cache,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    /// Full build, ignoring cached modules.
    pub fn build(&self) -> Result<Build, BuildError> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.run(&[])
    }

    /// Incremental build after `changed` files were modified, added or
    /// removed. Changed modules and their importers are transformed again;
    /// everything else comes from the cache.
    pub fn rebuild(&self, changed: &[PathBuf]) -> Result<Build, BuildError> {
        self.run(changed)
    }

    fn run(&self, changed: &[PathBuf]) -> Result<Build, BuildError> {
        let started = Instant::now();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if !changed.is_empty() {
            cache.invalidate(changed);
        }

        let graph = GraphBuilder::new(&self.root, &self.config, &self.resolver)
            .with_cache(&cache)
            .build()?;
        let outputs = ChainExecutor::new(&self.registry, &self.env).execute_all(
            &graph,
            &self.rules,
            Some(&*cache),
        )?;
        cache.store(&graph, &outputs);
        drop(cache);

        let build = Assembler::new(&self.root, &self.config).assemble(&graph, &outputs)?;
        let build = PluginOrchestrator::for_config(&self.root, &self.config)
            .run(build)?
            .seal();

        info!(
            mode = self.config.mode.as_str(),
            modules = graph.len(),
            bundles = build.bundles.len(),
            files = build.files().count(),
            warnings = build.diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build complete"
        );
        Ok(build)
    }
}

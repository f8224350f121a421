//! Transformation chains.
//!
//! A chain is the ordered step list of every rule matched for a module.
//! Each step receives the previous step's [`ModuleValue`] and its own option
//! set; side artifacts (extracted stylesheets, emitted files) are collected
//! in the [`StepContext`] and merged later by the assembler in traversal
//! order.

use super::cache::ModuleCache;
use super::graph::{Dependency, Module, ModuleGraph};
use super::rules::{Rule, RuleSet};
use super::steps;
use crate::config::{Mode, PipelineConfig};
use crate::error::{BuildError, Diagnostic};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Value flowing between steps.
#[derive(Debug, Clone)]
pub enum ModuleValue {
    /// Raw file bytes, as loaded.
    Source(Arc<Vec<u8>>),
    /// Compiled script, ready for the module registry.
    Script(String),
    /// Stylesheet text with its CSS Modules exports.
    Style {
        css: String,
        exports: BTreeMap<String, String>,
    },
}

impl ModuleValue {
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Source(_) => "raw source",
            Self::Script(_) => "script",
            Self::Style { .. } => "stylesheet",
        }
    }

    /// Text of the value; raw bytes are decoded lossily.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Source(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Self::Script(code) => code.clone(),
            Self::Style { css, .. } => css.clone(),
        }
    }
}

/// Output deferred to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideArtifact {
    /// Stylesheet fragment for the bundle containing the module.
    Stylesheet { css: String },
    /// Standalone file under a final output name.
    Emit { name: String, bytes: Arc<Vec<u8>> },
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),
    /// Advisory findings; not an error unless the rule is fatal.
    #[error("{} finding(s)", .0.len())]
    Findings(Vec<String>),
}

impl StepError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

/// A named transformation step.
pub trait TransformStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError>;
}

/// Steps available to rules, by name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: BTreeMap<String, Arc<dyn TransformStep>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.keys()).finish()
    }
}

impl StepRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in step.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for step in steps::builtins() {
            registry.register(step);
        }
        registry
    }

    /// Add or replace a step under its own name.
    pub fn register(&mut self, step: Arc<dyn TransformStep>) {
        self.steps.insert(step.name().to_string(), step);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TransformStep>> {
        self.steps.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }
}

/// Build-wide settings visible to every step.
#[derive(Debug, Clone)]
pub struct ChainEnv {
    pub mode: Mode,
    pub root: PathBuf,
    pub public_path: String,
    /// Styles become side artifacts rather than injected `<style>` elements.
    pub extract: bool,
    /// Directories searched by Sass imports.
    pub load_paths: Vec<PathBuf>,
    pub advisory_fatal: bool,
}

impl ChainEnv {
    #[must_use]
    pub fn from_config(root: &Path, config: &PipelineConfig) -> Self {
        Self {
            mode: config.mode,
            root: root.to_path_buf(),
            public_path: config.output.public_path.clone(),
            extract: !config.extract_css.disable,
            load_paths: config.resolve.modules.iter().map(|m| root.join(m)).collect(),
            advisory_fatal: config.advisory_fatal,
        }
    }
}

/// Per-module state handed to each step.
pub struct StepContext<'a> {
    pub module: &'a Module,
    pub env: &'a ChainEnv,
    artifacts: Vec<SideArtifact>,
    public_url: Option<String>,
    hot_accepting: bool,
    line_preserving: bool,
}

impl<'a> StepContext<'a> {
    #[must_use]
    pub fn new(module: &'a Module, env: &'a ChainEnv) -> Self {
        Self {
            module,
            env,
            artifacts: Vec::new(),
            public_url: None,
            hot_accepting: false,
            line_preserving: false,
        }
    }

    /// Resolution of `specifier` as recorded in the graph.
    pub fn dependency(&self, specifier: &str) -> Result<&'a Dependency, StepError> {
        self.module.dependency(specifier).ok_or_else(|| {
            StepError::Failed(format!(
                "'{specifier}' is not a resolved dependency of {}",
                self.module.id
            ))
        })
    }

    pub fn emit(&mut self, artifact: SideArtifact) {
        self.artifacts.push(artifact);
    }

    /// URL the module is reachable at once emitted (file name under the
    /// output root, or a `data:` URI).
    pub fn set_public_url(&mut self, url: String) {
        self.public_url = Some(url);
    }

    /// Mark the module as a hot boundary.
    pub fn accept_hot(&mut self) {
        self.hot_accepting = true;
    }

    /// Mark the output as keeping every source line on the same line.
    pub fn preserve_lines(&mut self) {
        self.line_preserving = true;
    }

    #[must_use]
    pub fn artifacts(&self) -> &[SideArtifact] {
        &self.artifacts
    }

    #[must_use]
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    #[must_use]
    pub fn is_hot_accepting(&self) -> bool {
        self.hot_accepting
    }
}

/// Result of running a module's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutput {
    pub id: String,
    /// Module body, to be wrapped in a registry definition.
    pub code: String,
    pub artifacts: Vec<SideArtifact>,
    pub public_url: Option<String>,
    pub hot_accepting: bool,
    /// Line `n` of `code` comes from line `n` of the source.
    pub line_preserving: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ModuleOutput {
    #[must_use]
    pub fn new(id: &str, code: String) -> Self {
        Self {
            id: id.to_string(),
            code,
            artifacts: Vec::new(),
            public_url: None,
            hot_accepting: false,
            line_preserving: false,
            diagnostics: Vec::new(),
        }
    }
}

/// Runs transformation chains.
pub struct ChainExecutor<'a> {
    registry: &'a StepRegistry,
    env: &'a ChainEnv,
}

impl<'a> ChainExecutor<'a> {
    #[must_use]
    pub fn new(registry: &'a StepRegistry, env: &'a ChainEnv) -> Self {
        Self { registry, env }
    }

    /// Run the chains of `rules` (already in execution order) over `module`.
    pub fn execute(&self, module: &Module, rules: &[&Rule]) -> Result<ModuleOutput, BuildError> {
        let mut cx = StepContext::new(module, self.env);
        let mut diagnostics = Vec::new();
        let mut value = ModuleValue::Source(Arc::clone(&module.source));

        for rule in rules {
            if rule.advisory {
                // Advisory chains inspect a copy in a scratch context; their
                // output and side effects are discarded.
                let mut inspected = value.clone();
                let mut scratch = StepContext::new(module, self.env);
                for spec in &rule.chain {
                    let step = self.step(&spec.step)?;
                    match step.run(inspected, &spec.options, &mut scratch) {
                        Ok(next) => inspected = next,
                        Err(StepError::Findings(findings)) => {
                            if self.env.advisory_fatal {
                                return Err(BuildError::AdvisoryStepFailure {
                                    module: module.id.clone(),
                                    step: spec.step.clone(),
                                    findings,
                                });
                            }
                            for message in findings {
                                warn!(module = %module.id, step = %spec.step, "{message}");
                                diagnostics.push(Diagnostic {
                                    module: module.id.clone(),
                                    step: spec.step.clone(),
                                    message,
                                });
                            }
                            break;
                        }
                        Err(StepError::Failed(message)) => {
                            return Err(self.failure(module, &spec.step, message));
                        }
                    }
                }
                continue;
            }

            for spec in &rule.chain {
                let step = self.step(&spec.step)?;
                value = step
                    .run(value, &spec.options, &mut cx)
                    .map_err(|e| self.failure(module, &spec.step, e.to_string()))?;
            }
        }

        let last_step = rules
            .iter()
            .rev()
            .find(|r| !r.advisory)
            .and_then(|r| r.chain.last())
            .map_or("<none>", |s| s.step.as_str());
        let code = match value {
            ModuleValue::Script(code) => code,
            ModuleValue::Style { .. } => {
                return Err(self.failure(
                    module,
                    last_step,
                    "chain ends with an unconsumed stylesheet (add 'extract')".to_string(),
                ))
            }
            ModuleValue::Source(_) => {
                return Err(self.failure(
                    module,
                    last_step,
                    "chain produced no script output".to_string(),
                ))
            }
        };

        Ok(ModuleOutput {
            id: module.id.clone(),
            code,
            artifacts: cx.artifacts,
            public_url: cx.public_url,
            hot_accepting: cx.hot_accepting,
            line_preserving: cx.line_preserving,
            diagnostics,
        })
    }

    /// Transform every module of `graph` in parallel, reusing cached
    /// outputs. Results are in traversal order; the first failure by
    /// traversal index wins.
    pub fn execute_all(
        &self,
        graph: &ModuleGraph,
        rules: &RuleSet,
        cache: Option<&ModuleCache>,
    ) -> Result<Vec<Arc<ModuleOutput>>, BuildError> {
        let results: Vec<Result<(Arc<ModuleOutput>, bool), BuildError>> = graph
            .modules()
            .par_iter()
            .map(|module| {
                if let Some(output) = cache.and_then(|c| c.output(&module.id)) {
                    return Ok((output, true));
                }
                let matched = rules.match_module(&module.id, module.kind)?;
                self.execute(module, &matched).map(|o| (Arc::new(o), false))
            })
            .collect();

        let mut outputs = Vec::with_capacity(results.len());
        let mut reused = 0usize;
        for result in results {
            let (output, cached) = result?;
            reused += usize::from(cached);
            outputs.push(output);
        }
        debug!(
            transformed = outputs.len() - reused,
            reused,
            "module chains executed"
        );
        Ok(outputs)
    }

    fn step(&self, name: &str) -> Result<&Arc<dyn TransformStep>, BuildError> {
        self.registry
            .get(name)
            .ok_or_else(|| BuildError::config(format!("unknown step '{name}'")))
    }

    fn failure(&self, module: &Module, step: &str, message: String) -> BuildError {
        BuildError::TransformStepFailure {
            module: module.id.clone(),
            step: step.to_string(),
            message,
        }
    }
}

/// Placeholder standing for the public URL of module `id` until the
/// assembler knows the emitted name.
#[must_use]
pub fn asset_placeholder(id: &str) -> String {
    let mut out = String::with_capacity(id.len() * 2 + 24);
    out.push_str("__PACKLINE_ASSET_");
    for b in id.bytes() {
        out.push_str(&format!("{b:02x}"));
    }
    out.push_str("__");
    out
}

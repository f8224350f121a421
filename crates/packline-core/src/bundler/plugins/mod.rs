//! Post-assembly passes.
//!
//! Each [`Pass`] completes one aspect of the assembled [`Build`]. The
//! orchestrator runs them in a fixed order; a failing pass aborts the build.

mod case_guard;
mod define;
mod extract_css;
mod html;
mod icons;
mod minify;

pub use case_guard::CaseGuardPass;
pub use define::DefinePass;
pub use extract_css::ExtractCssPass;
pub use html::HtmlPass;
pub use icons::IconsPass;
pub use minify::MinifyPass;

use super::build::Build;
use crate::config::PipelineConfig;
use crate::error::BuildError;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// One ordered pass over the build.
///
/// Passes are idempotent: running a pass twice on its own output changes
/// nothing.
pub trait Pass: Send + Sync {
    /// Pass name for logs and [`BuildError::PassFailure`].
    fn name(&self) -> &'static str;

    fn run(&self, build: &mut Build) -> Result<(), BuildError>;
}

/// Runs the configured passes in order.
pub struct PluginOrchestrator {
    passes: Vec<Box<dyn Pass>>,
}

impl PluginOrchestrator {
    /// An orchestrator with no passes.
    #[must_use]
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The passes `config` asks for, in their fixed order.
    #[must_use]
    pub fn for_config(root: &Path, config: &PipelineConfig) -> Self {
        let mut orchestrator = Self::new()
            .with(DefinePass::new(&config.define))
            .with(CaseGuardPass::new(root))
            .with(ExtractCssPass::new(config))
            .with(HtmlPass::new(root, config));
        if config.minify.enabled {
            orchestrator = orchestrator.with(MinifyPass::new(&config.minify));
        }
        if config.icons.enabled {
            orchestrator = orchestrator.with(IconsPass::new(root, &config.icons));
        }
        orchestrator
    }

    #[must_use]
    pub fn with(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    pub fn run(&self, mut build: Build) -> Result<Build, BuildError> {
        for pass in &self.passes {
            let started = Instant::now();
            pass.run(&mut build)?;
            debug!(
                pass = pass.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pass complete"
            );
        }
        Ok(build)
    }
}

impl Default for PluginOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

//! Built-in transformation steps.

mod css;
mod extract;
mod file;
mod json;
mod lint;
mod postcss;
mod sass;
mod script;
mod stylelint;
mod url;

use super::chain::TransformStep;
use serde_json::Value;
use std::sync::Arc;

/// Every built-in step.
#[must_use]
pub fn builtins() -> Vec<Arc<dyn TransformStep>> {
    vec![
        Arc::new(lint::LintStep),
        Arc::new(stylelint::StylelintStep),
        Arc::new(script::ScriptStep),
        Arc::new(json::JsonStep),
        Arc::new(sass::SassStep),
        Arc::new(css::CssStep),
        Arc::new(postcss::PostcssStep),
        Arc::new(extract::ExtractStep),
        Arc::new(url::UrlStep),
        Arc::new(file::FileStep),
    ]
}

/// MIME type for a file extension (without the dot).
#[must_use]
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn opt_bool(options: &Value, key: &str, default: bool) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn opt_str<'v>(options: &'v Value, key: &str) -> Option<&'v str> {
    options.get(key).and_then(Value::as_str)
}

fn opt_u64(options: &Value, key: &str) -> Option<u64> {
    options.get(key).and_then(Value::as_u64)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::bundler::chain::{ChainEnv, ModuleValue, StepContext, StepError, TransformStep};
    use crate::bundler::graph::{Dependency, DependencyTarget, Module, ModuleKind};
    use crate::config::{Mode, PipelineConfig, ProcessConfig};
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    pub fn module(id: &str, source: &[u8]) -> Module {
        Module {
            id: id.to_string(),
            path: PathBuf::from("/project").join(id),
            kind: ModuleKind::from_path(Path::new(id)),
            source: Arc::new(source.to_vec()),
            dependencies: Vec::new(),
            index: 0,
        }
    }

    pub fn with_deps(mut module: Module, deps: &[(&str, DependencyTarget, bool)]) -> Module {
        module.dependencies = deps
            .iter()
            .map(|(spec, target, dynamic)| Dependency {
                specifier: (*spec).to_string(),
                target: target.clone(),
                dynamic: *dynamic,
            })
            .collect();
        module
    }

    pub fn env(mode: Mode) -> ChainEnv {
        let config = PipelineConfig::for_mode(mode, &ProcessConfig::default());
        ChainEnv::from_config(Path::new("/project"), &config)
    }

    pub fn source(module: &Module) -> ModuleValue {
        ModuleValue::Source(Arc::clone(&module.source))
    }

    /// Run one step over `input` and hand back the context for inspection.
    pub fn run_step<'a>(
        step: &dyn TransformStep,
        module: &'a Module,
        env: &'a ChainEnv,
        input: ModuleValue,
        options: &Value,
    ) -> (Result<ModuleValue, StepError>, StepContext<'a>) {
        let mut cx = StepContext::new(module, env);
        let result = step.run(input, options, &mut cx);
        (result, cx)
    }
}

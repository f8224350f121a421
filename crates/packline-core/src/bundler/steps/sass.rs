use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use super::opt_bool;
use crate::css::sass::{compile_sass, SassOptions};
use serde_json::Value;
use std::collections::BTreeMap;

/// Compiles SCSS or indented Sass into CSS.
///
/// `@import` and `@use` search the file's directory, then every
/// `resolve.modules` directory, then `includePaths` from the options.
pub struct SassStep;

impl TransformStep for SassStep {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn run(
        &self,
        input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let mut load_paths = cx.env.load_paths.clone();
        if let Some(extra) = options.get("includePaths").and_then(Value::as_array) {
            load_paths.extend(
                extra
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|p| cx.env.root.join(p)),
            );
        }
        let sass_options = SassOptions {
            load_paths,
            minify: opt_bool(options, "compressed", false),
            filename: Some(cx.module.path.clone()),
        };
        let css = compile_sass(&input.text(), &sass_options).map_err(StepError::failed)?;
        Ok(ModuleValue::Style {
            css,
            exports: BTreeMap::new(),
        })
    }
}

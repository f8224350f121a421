use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use super::opt_bool;
use crate::css::{process_css, CssOptions};
use serde_json::Value;

/// Adds vendor prefixes for the legacy browser targets and optionally
/// minifies. Options: `autoprefix` (default true), `minimize`.
pub struct PostcssStep;

impl TransformStep for PostcssStep {
    fn name(&self) -> &'static str {
        "postcss"
    }

    fn run(
        &self,
        input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let ModuleValue::Style { css, exports } = input else {
            return Err(StepError::failed(format!(
                "postcss step expects a stylesheet, got {}",
                input.describe()
            )));
        };
        let result = process_css(
            &css,
            &CssOptions {
                autoprefix: opt_bool(options, "autoprefix", true),
                minify: opt_bool(options, "minimize", false),
                filename: cx.module.id.clone(),
                ..CssOptions::default()
            },
        )
        .map_err(StepError::failed)?;
        Ok(ModuleValue::Style {
            css: result.code,
            exports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::steps::testing::{env, module, run_step};
    use crate::config::Mode;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn run(css: &str, options: &Value) -> String {
        let m = module("src/a.css", css.as_bytes());
        let env = env(Mode::Production);
        let input = ModuleValue::Style {
            css: css.to_string(),
            exports: BTreeMap::new(),
        };
        match run_step(&PostcssStep, &m, &env, input, options).0.unwrap() {
            ModuleValue::Style { css, .. } => css,
            other => panic!("unexpected value: {}", other.describe()),
        }
    }

    #[test]
    fn test_adds_vendor_prefixes() {
        let css = run(".a { display: flex; }", &json!({ "autoprefix": true }));
        assert!(css.contains("-ms-flexbox") || css.contains("-webkit-box"));
    }

    #[test]
    fn test_minimize() {
        let css = run(".a {\n  color: red;\n}\n", &json!({ "autoprefix": false, "minimize": true }));
        assert_eq!(css, ".a{color:red}");
    }

    #[test]
    fn test_keeps_asset_placeholders() {
        let css = run(
            ".a { background: url(__PACKLINE_ASSET_61__); }",
            &json!({ "minimize": true }),
        );
        assert!(css.contains("__PACKLINE_ASSET_61__"));
    }

    #[test]
    fn test_rejects_raw_source() {
        let m = module("src/a.css", b".a{}");
        let env = env(Mode::Production);
        let input = crate::bundler::steps::testing::source(&m);
        let (result, _) = run_step(&PostcssStep, &m, &env, input, &Value::Null);
        assert!(result.is_err());
    }
}

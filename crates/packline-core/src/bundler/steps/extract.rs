use super::super::chain::{ModuleValue, SideArtifact, StepContext, StepError, TransformStep};
use crate::js;
use serde_json::Value;
use std::collections::BTreeMap;

/// Ends a style chain.
///
/// With extraction on, the stylesheet becomes a side artifact merged into
/// the bundle's CSS file; otherwise the module injects it as a `<style>`
/// element. Either way the module exports its CSS Modules class map and is
/// a hot boundary.
pub struct ExtractStep;

impl TransformStep for ExtractStep {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn run(
        &self,
        input: ModuleValue,
        _options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let ModuleValue::Style { css, exports } = input else {
            return Err(StepError::failed(format!(
                "extract step expects a stylesheet, got {}",
                input.describe()
            )));
        };

        let class_map = exports_literal(&exports);
        let code = if cx.env.extract {
            cx.emit(SideArtifact::Stylesheet { css });
            format!("module.exports = {class_map};\n")
        } else {
            format!(
                "__packline.style({}, {});\nmodule.exports = {class_map};\n",
                js::quote(&cx.module.id),
                js::quote(&css)
            )
        };
        cx.accept_hot();
        Ok(ModuleValue::Script(code))
    }
}

fn exports_literal(exports: &BTreeMap<String, String>) -> String {
    serde_json::to_string(exports).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::steps::testing::{env, module, run_step};
    use crate::config::Mode;

    fn input() -> ModuleValue {
        let mut exports = BTreeMap::new();
        exports.insert("title".to_string(), "title--x1".to_string());
        ModuleValue::Style {
            css: ".title--x1{color:red}".to_string(),
            exports,
        }
    }

    #[test]
    fn test_extraction_defers_stylesheet() {
        let m = module("src/App.scss", b"");
        let env = env(Mode::Production);
        let (result, cx) = run_step(&ExtractStep, &m, &env, input(), &Value::Null);
        let ModuleValue::Script(code) = result.unwrap() else {
            panic!("expected script");
        };
        assert_eq!(code, "module.exports = {\"title\":\"title--x1\"};\n");
        assert_eq!(
            cx.artifacts(),
            &[SideArtifact::Stylesheet {
                css: ".title--x1{color:red}".to_string()
            }]
        );
        assert!(cx.is_hot_accepting());
    }

    #[test]
    fn test_injection_when_extraction_is_disabled() {
        let m = module("src/App.scss", b"");
        let env = env(Mode::Development);
        let (result, cx) = run_step(&ExtractStep, &m, &env, input(), &Value::Null);
        let ModuleValue::Script(code) = result.unwrap() else {
            panic!("expected script");
        };
        assert!(code.starts_with(
            "__packline.style(\"src/App.scss\", \".title--x1{color:red}\");\n"
        ));
        assert!(cx.artifacts().is_empty());
        assert!(cx.is_hot_accepting());
    }
}

use super::super::chain::{asset_placeholder, ModuleValue, StepContext, StepError, TransformStep};
use super::super::graph::DependencyTarget;
use super::{opt_bool, opt_str};
use crate::css::{process_css, CssOptions};
use crate::imports::style_url_specifier;
use serde_json::Value;
use std::collections::BTreeMap;

const DEFAULT_LOCAL_IDENT: &str = "[hash]_[local]";

/// Parses a stylesheet, optionally scoping class names (CSS Modules), and
/// swaps `url()` references to bundled files for asset placeholders.
///
/// Options: `modules` (bool), `localIdentName` (pattern), `url` (bool,
/// default true).
pub struct CssStep;

impl TransformStep for CssStep {
    fn name(&self) -> &'static str {
        "css"
    }

    fn run(
        &self,
        input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let (source, mut exports) = match input {
            ModuleValue::Style { css, exports } => (css, exports),
            ModuleValue::Source(bytes) => {
                (String::from_utf8_lossy(&bytes).into_owned(), BTreeMap::new())
            }
            ModuleValue::Script(_) => {
                return Err(StepError::failed("css step cannot consume a script"))
            }
        };

        let modules = opt_bool(options, "modules", false).then(|| {
            opt_str(options, "localIdentName")
                .unwrap_or(DEFAULT_LOCAL_IDENT)
                .to_string()
        });
        let analyze_urls = opt_bool(options, "url", true);
        let result = process_css(
            &source,
            &CssOptions {
                modules,
                analyze_urls,
                filename: cx.module.id.clone(),
                ..CssOptions::default()
            },
        )
        .map_err(StepError::failed)?;

        let mut css = result.code;
        for reference in &result.urls {
            let replacement = match style_url_specifier(&reference.url)
                .and_then(|spec| cx.module.dependency(&spec))
                .map(|dep| &dep.target)
            {
                Some(DependencyTarget::Module(id)) => asset_placeholder(id),
                _ => reference.url.clone(),
            };
            css = css.replace(&reference.placeholder, &replacement);
        }

        exports.extend(result.exports);
        Ok(ModuleValue::Style { css, exports })
    }
}

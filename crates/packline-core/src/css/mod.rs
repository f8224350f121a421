//! Stylesheet processing using lightningcss.
//!
//! Provides:
//! - CSS Modules (scoped class names with a configurable pattern)
//! - `url()` dependency analysis with placeholder substitution
//! - Vendor prefixing for legacy browser targets
//! - Minification
//! - Sass/SCSS preprocessing (see [`sass`])

pub mod sass;

use lightningcss::css_modules::{Config as ModulesConfig, Pattern};
use lightningcss::dependencies::{Dependency, DependencyOptions};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Stylesheet processing options.
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    /// CSS Modules naming pattern, e.g. `[name]__[local]--[hash]`.
    /// Modules are disabled when `None`.
    pub modules: Option<String>,
    /// Collect `url()` references and replace them with placeholders.
    pub analyze_urls: bool,
    /// Add vendor prefixes for `targets`, or [`LEGACY_QUERY`] when unset.
    pub autoprefix: bool,
    pub minify: bool,
    /// Module id, used in errors and CSS Modules hashes.
    pub filename: String,
    pub targets: Option<Browsers>,
}

/// A `url()` reference replaced by a placeholder in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReference {
    /// The reference as written.
    pub url: String,
    /// Text standing in for it in [`CssResult::code`].
    pub placeholder: String,
}

/// Result of stylesheet processing.
#[derive(Debug, Clone, Default)]
pub struct CssResult {
    pub code: String,
    /// Local class name to scoped class name. Empty unless modules are on.
    pub exports: BTreeMap<String, String>,
    /// Only populated when `analyze_urls` is set.
    pub urls: Vec<UrlReference>,
}

/// Stylesheet processing error.
#[derive(Debug, Error)]
pub enum CssError {
    #[error("CSS parse error: {0}")]
    Parse(String),
    #[error("CSS transform error: {0}")]
    Transform(String),
    #[error("CSS print error: {0}")]
    Print(String),
}

/// Process a stylesheet with lightningcss.
pub fn process_css(source: &str, options: &CssOptions) -> Result<CssResult, CssError> {
    let filename = if options.filename.is_empty() {
        "input.css"
    } else {
        options.filename.as_str()
    };

    let mut parser_options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };
    if let Some(pattern) = options.modules.as_deref() {
        parser_options.css_modules = Some(ModulesConfig {
            pattern: Pattern::parse(pattern)
                .map_err(|e| CssError::Parse(format!("CSS Modules pattern '{pattern}': {e}")))?,
            ..ModulesConfig::default()
        });
    }

    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| CssError::Parse(format!("{filename}: {e}")))?;

    let targets = if options.autoprefix {
        let browsers = match options.targets {
            Some(browsers) => browsers,
            None => legacy_targets()?,
        };
        Targets::from(browsers)
    } else {
        Targets::default()
    };

    if options.minify || options.autoprefix {
        stylesheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| CssError::Transform(format!("{filename}: {e}")))?;
    }

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets,
            analyze_dependencies: options
                .analyze_urls
                .then_some(DependencyOptions { remove_imports: false }),
            ..PrinterOptions::default()
        })
        .map_err(|e| CssError::Print(format!("{filename}: {e}")))?;

    let exports = output
        .exports
        .map(|exports| {
            exports
                .iter()
                .map(|(local, export)| (local.to_string(), export.name.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let urls = output
        .dependencies
        .unwrap_or_default()
        .into_iter()
        .filter_map(|dep| match dep {
            Dependency::Url(url) => Some(UrlReference {
                url: url.url,
                placeholder: url.placeholder,
            }),
            Dependency::Import(_) => None,
        })
        .collect();

    Ok(CssResult {
        code: output.code,
        exports,
        urls,
    })
}

/// Browserslist query used for vendor prefixing when no targets are given.
pub const LEGACY_QUERY: [&str; 4] = [">1%", "last 4 versions", "Firefox ESR", "not ie < 9"];

static LEGACY_TARGETS: OnceLock<Result<Browsers, String>> = OnceLock::new();

/// Browser targets resolved from [`LEGACY_QUERY`].
pub fn legacy_targets() -> Result<Browsers, CssError> {
    LEGACY_TARGETS
        .get_or_init(|| {
            Browsers::from_browserslist(LEGACY_QUERY)
                .map(Option::unwrap_or_default)
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| CssError::Transform(format!("browser targets: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_processing() {
        let result = process_css(".foo { color: red; }", &CssOptions::default()).unwrap();
        assert!(result.code.contains("color"));
        assert!(result.exports.is_empty());
        assert!(result.urls.is_empty());
    }

    #[test]
    fn test_minification() {
        let options = CssOptions {
            minify: true,
            ..CssOptions::default()
        };
        let result = process_css(".foo {\n  color: red;\n  margin: 10px;\n}", &options).unwrap();
        assert!(!result.code.contains('\n'));
    }

    #[test]
    fn test_autoprefix_for_legacy_targets() {
        let options = CssOptions {
            autoprefix: true,
            ..CssOptions::default()
        };
        let result = process_css(".foo { user-select: none; }", &options).unwrap();
        assert!(result.code.contains("-webkit-user-select"));
    }

    #[test]
    fn test_legacy_targets_stop_at_ie9() {
        let targets = legacy_targets().unwrap();
        assert_eq!(targets.ie, Some(9 << 16));
        assert!(targets.firefox.is_some());
        assert!(targets.safari.is_some());
    }

    #[test]
    fn test_autoprefix_flexbox_for_old_engines() {
        let options = CssOptions {
            autoprefix: true,
            ..CssOptions::default()
        };
        let result = process_css(".row { display: flex; }", &options).unwrap();
        assert!(result.code.contains("-ms-flexbox"));
    }

    #[test]
    fn test_css_modules_pattern() {
        let options = CssOptions {
            modules: Some("[local]--[hash]".to_string()),
            filename: "src/App.scss".to_string(),
            ..CssOptions::default()
        };
        let result = process_css(".button { color: blue; }", &options).unwrap();
        let scoped = result.exports.get("button").unwrap();
        assert!(scoped.starts_with("button--"));
        assert!(result.code.contains(scoped.as_str()));
    }

    #[test]
    fn test_css_modules_hash_is_stable() {
        let options = CssOptions {
            modules: Some("[local]--[hash]".to_string()),
            filename: "src/App.scss".to_string(),
            ..CssOptions::default()
        };
        let a = process_css(".x { color: red; }", &options).unwrap();
        let b = process_css(".x { color: blue; }", &options).unwrap();
        assert_eq!(a.exports, b.exports);
    }

    #[test]
    fn test_url_placeholders() {
        let options = CssOptions {
            analyze_urls: true,
            ..CssOptions::default()
        };
        let result =
            process_css(".a { background: url(img/bg.png); }", &options).unwrap();
        assert_eq!(result.urls.len(), 1);
        assert_eq!(result.urls[0].url, "img/bg.png");
        assert!(result.code.contains(&result.urls[0].placeholder));
        assert!(!result.code.contains("img/bg.png"));
    }

    #[test]
    fn test_invalid_modules_pattern() {
        let options = CssOptions {
            modules: Some("[bogus]".to_string()),
            ..CssOptions::default()
        };
        let err = process_css(".a { color: red; }", &options).unwrap_err();
        assert!(matches!(err, CssError::Parse(_)));
    }
}

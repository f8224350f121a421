//! Advisory stylesheet checks.

use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use crate::js::line_at;
use regex_lite::Regex;
use serde_json::Value;

/// Reports empty blocks (`block-no-empty`) and malformed hex colors
/// (`color-no-invalid-hex`).
pub struct StylelintStep;

impl TransformStep for StylelintStep {
    fn name(&self) -> &'static str {
        "stylelint"
    }

    fn run(
        &self,
        input: ModuleValue,
        _options: &Value,
        _cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let empty_block = Regex::new(r"\{\s*\}").map_err(StepError::failed)?;
        let declaration_value = Regex::new(r":([^;{}]*)[;}]").map_err(StepError::failed)?;
        let hex_color = Regex::new(r"(^|[\s,(])#([0-9A-Za-z]+)").map_err(StepError::failed)?;
        let url_call = Regex::new(r"(?i)url\([^)]*\)").map_err(StepError::failed)?;

        let css = blank_comments(&input.text());
        let mut findings = Vec::new();

        for m in empty_block.find_iter(&css) {
            let line = line_at(&css, m.start());
            findings.push(format!("line {line}: Unexpected empty block (block-no-empty)"));
        }

        for caps in declaration_value.captures_iter(&css) {
            let Some(value) = caps.get(1) else { continue };
            let text = url_call.replace_all(value.as_str(), "url()");
            for color in hex_color.captures_iter(&text) {
                let Some(digits) = color.get(2) else { continue };
                let digits = digits.as_str();
                let valid = matches!(digits.len(), 3 | 4 | 6 | 8)
                    && digits.bytes().all(|b| b.is_ascii_hexdigit());
                if !valid {
                    let line = line_at(&css, value.start());
                    findings.push(format!(
                        "line {line}: Unexpected invalid hex color \"#{digits}\" (color-no-invalid-hex)"
                    ));
                }
            }
        }

        if findings.is_empty() {
            Ok(input)
        } else {
            Err(StepError::Findings(findings))
        }
    }
}

/// Replace comment bodies with spaces, keeping newlines and offsets.
fn blank_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(open) = rest.find("/*") {
        out.push_str(&rest[..open]);
        let body = &rest[open..];
        let len = body.find("*/").map_or(body.len(), |p| p + 2);
        out.extend(body[..len].chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
        rest = &body[len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::steps::testing::{env, module, run_step, source};
    use crate::config::Mode;

    fn findings(css: &str) -> Vec<String> {
        let m = module("src/a.scss", css.as_bytes());
        let env = env(Mode::Development);
        match run_step(&StylelintStep, &m, &env, source(&m), &Value::Null).0 {
            Ok(_) => Vec::new(),
            Err(StepError::Findings(f)) => f,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_stylesheet() {
        let css = ".a { color: #fff; background: #AABBCC80 url(img.svg#icon); }\n#id:hover { margin: 0; }\n";
        assert!(findings(css).is_empty());
    }

    #[test]
    fn test_empty_block() {
        let found = findings(".a {\n}\n.b { color: red; }\n");
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("block-no-empty"));
    }

    #[test]
    fn test_invalid_hex() {
        let found = findings(".a {\n  color: #ggg;\n}\n.b { color: #12345; }\n");
        assert_eq!(found.len(), 2);
        assert!(found[0].starts_with("line 2:"));
        assert!(found[1].contains("#12345"));
    }

    #[test]
    fn test_comments_are_ignored() {
        assert!(findings("/* .a {} color: #zz; */\n.b { color: red; }\n").is_empty());
    }

    #[test]
    fn test_sass_interpolation_is_not_a_color() {
        assert!(findings(".a { width: #{$w}; }\n").is_empty());
    }
}

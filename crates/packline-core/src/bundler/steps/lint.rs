//! Advisory script checks.

use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use crate::js::{self, TokenKind};
use serde_json::Value;

/// Reports `debugger` statements and calls to `alert` and `eval`.
///
/// Individual checks can be switched off with
/// `{ "rules": { "no-alert": false } }`.
pub struct LintStep;

const CHECKS: &[(&str, &str, bool, &str)] = &[
    ("no-debugger", "debugger", false, "Unexpected 'debugger' statement"),
    ("no-alert", "alert", true, "Unexpected alert"),
    ("no-eval", "eval", true, "eval can be harmful"),
];

impl TransformStep for LintStep {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn run(
        &self,
        input: ModuleValue,
        options: &Value,
        _cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let source = input.text();
        let tokens = js::tokenize(&source);
        let enabled = |rule: &str| {
            options
                .get("rules")
                .and_then(|r| r.get(rule))
                .and_then(Value::as_bool)
                .unwrap_or(true)
        };

        let mut findings = Vec::new();
        for (i, tok) in tokens.iter().enumerate() {
            if tok.kind != TokenKind::Word {
                continue;
            }
            if i > 0 && tokens[i - 1].is_punct(&source, b'.') {
                continue;
            }
            let word = tok.text(&source);
            for &(rule, name, call, message) in CHECKS {
                if word != name || !enabled(rule) {
                    continue;
                }
                if call && !tokens.get(i + 1).is_some_and(|t| t.is_punct(&source, b'(')) {
                    continue;
                }
                let line = js::line_at(&source, tok.start);
                findings.push(format!("line {line}: {message} ({rule})"));
            }
        }

        if findings.is_empty() {
            Ok(input)
        } else {
            Err(StepError::Findings(findings))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::steps::testing::{env, module, run_step, source};
    use crate::config::Mode;
    use serde_json::json;

    fn findings(code: &str, options: &Value) -> Vec<String> {
        let m = module("src/a.js", code.as_bytes());
        let env = env(Mode::Development);
        match run_step(&LintStep, &m, &env, source(&m), options).0 {
            Ok(_) => Vec::new(),
            Err(StepError::Findings(f)) => f,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clean_code_passes_through() {
        assert!(findings("const a = 1;\nconsole.log(a);\n", &Value::Null).is_empty());
    }

    #[test]
    fn test_reports_each_check_with_line() {
        let code = "debugger;\nalert('x');\neval('1');\n";
        let found = findings(code, &Value::Null);
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("line 1:"));
        assert!(found[1].contains("no-alert"));
        assert!(found[2].starts_with("line 3:"));
    }

    #[test]
    fn test_ignores_strings_comments_and_members() {
        let code = "// debugger\nconst s = 'alert(1)';\nwindow.alert(1);\nconst alert = 1;\n";
        assert!(findings(code, &Value::Null).is_empty());
    }

    #[test]
    fn test_rules_can_be_disabled() {
        let options = json!({ "rules": { "no-alert": false } });
        assert!(findings("alert(1);\n", &options).is_empty());
    }
}

use super::Pass;
use crate::bundler::build::Build;
use crate::error::BuildError;
use crate::js::{self, Token, TokenKind};
use std::collections::BTreeMap;

/// Replaces dotted constant references (`process.env.NODE_ENV`) with
/// configured literals.
///
/// Matching is token based, so occurrences inside strings, comments and
/// longer identifiers are left alone, as are property accesses ending in
/// a key (`a.process.env.NODE_ENV`).
pub struct DefinePass {
    /// Key segments and replacement, longest key first.
    keys: Vec<(Vec<String>, String)>,
}

impl DefinePass {
    #[must_use]
    pub fn new(define: &BTreeMap<String, String>) -> Self {
        let mut keys: Vec<(Vec<String>, String)> = define
            .iter()
            .map(|(key, value)| (key.split('.').map(str::to_string).collect(), value.clone()))
            .collect();
        keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { keys }
    }

    /// `source` with every key replaced, or `None` when nothing matched.
    #[must_use]
    pub fn inject(&self, source: &str) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let tokens = js::tokenize(source);
        let mut out = String::with_capacity(source.len());
        let mut copied = 0;
        let mut i = 0;
        while i < tokens.len() {
            let after_dot = i > 0 && tokens[i - 1].is_punct(source, b'.');
            let matched = if after_dot || tokens[i].kind != TokenKind::Word {
                None
            } else {
                self.keys.iter().find_map(|(parts, value)| {
                    match_key(source, &tokens[i..], parts).map(|n| (n, value))
                })
            };
            let Some((len, value)) = matched else {
                i += 1;
                continue;
            };

            let start = tokens[i].start;
            let end = tokens[i + len - 1].end;
            out.push_str(&source[copied..start]);
            out.push_str(value);
            // Keep the line structure of multi-line references.
            for _ in source[start..end].matches('\n') {
                out.push('\n');
            }
            copied = end;
            i += len;
        }
        if copied == 0 {
            return None;
        }
        out.push_str(&source[copied..]);
        Some(out)
    }
}

/// Number of tokens `parts` spans at the start of `tokens`.
fn match_key(source: &str, tokens: &[Token], parts: &[String]) -> Option<usize> {
    let len = parts.len() * 2 - 1;
    if tokens.len() < len {
        return None;
    }
    for (k, part) in parts.iter().enumerate() {
        if !tokens[k * 2].is_word(source, part) {
            return None;
        }
        if k > 0 && !tokens[k * 2 - 1].is_punct(source, b'.') {
            return None;
        }
    }
    Some(len)
}

impl Pass for DefinePass {
    fn name(&self) -> &'static str {
        "define"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        for bundle in &mut build.bundles {
            if let Some(code) = self.inject(&bundle.code) {
                bundle.code = code;
            }
        }
        for record in &mut build.modules {
            if let Some(code) = self.inject(&record.code) {
                record.code = code;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass() -> DefinePass {
        let mut define = BTreeMap::new();
        define.insert("process.env.NODE_ENV".to_string(), "\"production\"".to_string());
        define.insert("process.env".to_string(), "{}".to_string());
        define.insert("__DEV__".to_string(), "false".to_string());
        DefinePass::new(&define)
    }

    #[test]
    fn test_replaces_dotted_keys() {
        let out = pass()
            .inject("if (process.env.NODE_ENV === \"production\") {}")
            .unwrap();
        assert_eq!(out, "if (\"production\" === \"production\") {}");
    }

    #[test]
    fn test_longest_key_wins() {
        let out = pass().inject("var e = process.env; var m = process.env.NODE_ENV;").unwrap();
        assert_eq!(out, "var e = {}; var m = \"production\";");
    }

    #[test]
    fn test_strings_comments_and_members_are_kept() {
        let p = pass();
        assert_eq!(p.inject("var s = 'process.env.NODE_ENV'; // process.env.NODE_ENV"), None);
        assert_eq!(p.inject("a.__DEV__ = 1; var __DEV__x = 2;"), None);
        assert_eq!(p.inject("if (__DEV__) {}").unwrap(), "if (false) {}");
    }

    #[test]
    fn test_injection_is_idempotent() {
        let p = pass();
        let once = p.inject("f(process.env.NODE_ENV)").unwrap();
        assert_eq!(p.inject(&once), None);
    }
}

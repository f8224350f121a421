//! Import specifier scanner.
//!
//! Finds import/require specifiers in scripts and `url()` references in
//! stylesheets without full parsing.

use crate::js::{self, Token, TokenKind};
use rustc_hash::FxHashMap;

/// How a specifier was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `import ... from "x"` or `import "x"`.
    EsmImport,
    /// `export ... from "x"`.
    EsmExport,
    /// `require("x")`.
    CjsRequire,
    /// `import("x")`, which splits the target into an async chunk.
    DynamicImport,
}

impl ImportKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EsmImport => "esm_import",
            Self::EsmExport => "esm_export",
            Self::CjsRequire => "cjs_require",
            Self::DynamicImport => "dynamic_import",
        }
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::DynamicImport)
    }
}

/// Import specifier found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecCore {
    /// Specifier exactly as found (quotes removed).
    pub raw: String,
    pub kind: ImportKind,
    /// Line number (1-indexed).
    pub line: Option<u32>,
}

impl ImportSpecCore {
    #[must_use]
    pub fn new(raw: impl Into<String>, kind: ImportKind, line: Option<u32>) -> Self {
        Self {
            raw: raw.into(),
            kind,
            line,
        }
    }
}

/// Maximum tokens scanned between `import` and `from`.
const CLAUSE_LIMIT: usize = 256;

/// Scan source code for import/require specifiers.
///
/// Returns discovered imports in first-appearance order, deduplicated by
/// `raw`. A specifier that is imported both statically and dynamically is
/// reported as static.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportSpecCore> {
    let tokens = js::tokenize(source);
    let mut results: Vec<ImportSpecCore> = Vec::new();
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();

    let mut record = |tok: &Token, kind: ImportKind| {
        let raw = js::string_value(tok.text(source));
        if raw.is_empty() {
            return;
        }
        match seen.get(&raw) {
            Some(&idx) => {
                if results[idx].kind.is_dynamic() && !kind.is_dynamic() {
                    results[idx].kind = kind;
                }
            }
            None => {
                seen.insert(raw.clone(), results.len());
                let line = Some(js::line_at(source, tok.start));
                results.push(ImportSpecCore::new(raw, kind, line));
            }
        }
    };

    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind != TokenKind::Word {
            continue;
        }
        // Member access such as `foo.require(...)`
        if i > 0 && tokens[i - 1].is_punct(source, b'.') {
            continue;
        }
        match tok.text(source) {
            "import" => {
                if let Some(spec) = call_argument(source, &tokens, i) {
                    record(spec, ImportKind::DynamicImport);
                } else if let Some(spec) = tokens.get(i + 1).filter(|t| t.is_string_literal(source))
                {
                    record(spec, ImportKind::EsmImport);
                } else if let Some(spec) = from_clause(source, &tokens, i + 1) {
                    record(spec, ImportKind::EsmImport);
                }
            }
            "export" => {
                let opens_clause = tokens
                    .get(i + 1)
                    .is_some_and(|t| t.is_punct(source, b'{') || t.is_punct(source, b'*'));
                if opens_clause {
                    if let Some(spec) = from_clause(source, &tokens, i + 1) {
                        record(spec, ImportKind::EsmExport);
                    }
                }
            }
            "require" => {
                if let Some(spec) = call_argument(source, &tokens, i) {
                    record(spec, ImportKind::CjsRequire);
                }
            }
            _ => {}
        }
    }

    results
}

/// `kw ( "spec" )` starting at the keyword token.
fn call_argument<'t>(source: &str, tokens: &'t [Token], kw: usize) -> Option<&'t Token> {
    let open = tokens.get(kw + 1)?;
    let arg = tokens.get(kw + 2)?;
    let close = tokens.get(kw + 3)?;
    (open.is_punct(source, b'(') && arg.is_string_literal(source) && close.is_punct(source, b')'))
        .then_some(arg)
}

/// Find `from "spec"` within the current statement.
fn from_clause<'t>(source: &str, tokens: &'t [Token], start: usize) -> Option<&'t Token> {
    let limit = (start + CLAUSE_LIMIT).min(tokens.len());
    let mut j = start;
    while j < limit {
        let tok = &tokens[j];
        if tok.is_punct(source, b';') || tok.is_punct(source, b'(') {
            return None;
        }
        if tok.is_word(source, "from") {
            return tokens.get(j + 1).filter(|t| t.is_string_literal(source));
        }
        if j > start && tok.kind == TokenKind::Str {
            return None;
        }
        j += 1;
    }
    None
}

/// Normalize a stylesheet `url()` target into a module specifier.
///
/// Returns `None` for references the pipeline leaves alone: data URIs,
/// remote and protocol-relative URLs, fragments and absolute paths. A `~`
/// prefix marks a bare module request; anything else is relative to the
/// stylesheet.
#[must_use]
pub fn style_url_specifier(raw: &str) -> Option<String> {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    if url.is_empty()
        || url.starts_with('#')
        || url.starts_with('/')
        || lower.starts_with("data:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
    {
        return None;
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.is_empty() {
        return None;
    }
    if let Some(bare) = path.strip_prefix('~') {
        return Some(bare.to_string());
    }
    if path.starts_with("./") || path.starts_with("../") {
        Some(path.to_string())
    } else {
        Some(format!("./{path}"))
    }
}

/// Scan a stylesheet for `url()` references, returning normalized
/// specifiers in first-appearance order without duplicates.
#[must_use]
pub fn scan_style_urls(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = source[i + 2..].find("*/").map_or(len, |p| i + 2 + p + 2);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = source[i..].find('\n').map_or(len, |p| i + p);
            }
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < len && bytes[i] != quote {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                i += 1;
            }
            b'u' | b'U' if i + 4 <= len && bytes[i..i + 4].eq_ignore_ascii_case(b"url(") => {
                let preceded = i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'-');
                let start = i + 4;
                let Some(close) = source[start..].find(')') else {
                    break;
                };
                let end = start + close;
                if !preceded {
                    let inner = source[start..end].trim();
                    let target = inner
                        .strip_prefix(['"', '\''])
                        .and_then(|s| s.strip_suffix(['"', '\'']))
                        .unwrap_or(inner);
                    if let Some(spec) = style_url_specifier(target) {
                        if !found.contains(&spec) {
                            found.push(spec);
                        }
                    }
                }
                i = end + 1;
            }
            _ => i += 1,
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esm_import_from() {
        let imports = scan_imports(r#"import { foo } from "./dep";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dep");
        assert_eq!(imports[0].kind, ImportKind::EsmImport);
    }

    #[test]
    fn test_esm_import_default_and_named() {
        let imports = scan_imports(r#"import React, { Component } from "react";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "react");
    }

    #[test]
    fn test_esm_import_side_effect() {
        let imports = scan_imports(r#"import "./polyfill";"#);
        assert_eq!(imports[0].raw, "./polyfill");
        assert_eq!(imports[0].kind, ImportKind::EsmImport);
    }

    #[test]
    fn test_dynamic_import() {
        let imports = scan_imports(r#"const mod = await import("./dynamic");"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dynamic");
        assert_eq!(imports[0].kind, ImportKind::DynamicImport);
    }

    #[test]
    fn test_static_wins_over_dynamic() {
        let source = r#"
import("./page");
import Page from "./page";
"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::EsmImport);
        assert_eq!(imports[0].line, Some(2));
    }

    #[test]
    fn test_cjs_require() {
        let imports = scan_imports(r#"const dep = require("./dep");"#);
        assert_eq!(imports[0].raw, "./dep");
        assert_eq!(imports[0].kind, ImportKind::CjsRequire);
    }

    #[test]
    fn test_member_require_is_ignored() {
        let imports = scan_imports(r#"loader.require("./x");"#);
        assert!(imports.is_empty());
    }

    #[test]
    fn test_export_from() {
        let source = r#"
export { foo } from "./dep";
export * from "./all";
export { local };
"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].kind, ImportKind::EsmExport);
        assert_eq!(imports[1].raw, "./all");
    }

    #[test]
    fn test_ignores_comments_and_strings() {
        let source = r#"
// import foo from "commented"
/* require("./nope") */
const s = "import x from './str'";
const t = `require("./tpl")`;
import bar from "./real";
"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./real");
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        assert!(scan_imports("const u = import.meta.url;").is_empty());
    }

    #[test]
    fn test_stable_order_and_dedup() {
        let source = r#"
import a from "./a";
import b from "./b";
import again from "./a";
"#;
        let raws: Vec<String> = scan_imports(source).into_iter().map(|i| i.raw).collect();
        assert_eq!(raws, vec!["./a", "./b"]);
    }

    #[test]
    fn test_line_numbers() {
        let source = "\nimport a from \"./a\";\n\nimport b from \"./b\";\n";
        let imports = scan_imports(source);
        assert_eq!(imports[0].line, Some(2));
        assert_eq!(imports[1].line, Some(4));
    }

    #[test]
    fn test_style_urls() {
        let css = r#"
/* url(ignored.png) */
.a { background: url("img/bg.png"); }
.b { background: url(../logo.svg?v=1); }
.c { background: url(data:image/png;base64,AAA); }
.d { background: url(~pkg/icon.png); }
.e { background: url('img/bg.png'); }
.f { background: url(https://cdn.example.com/x.png); }
"#;
        assert_eq!(
            scan_style_urls(css),
            vec!["./img/bg.png", "../logo.svg", "pkg/icon.png"]
        );
    }

    #[test]
    fn test_style_url_specifier() {
        assert_eq!(style_url_specifier("a.png").as_deref(), Some("./a.png"));
        assert_eq!(style_url_specifier("/abs.png"), None);
        assert_eq!(style_url_specifier("#frag"), None);
    }
}

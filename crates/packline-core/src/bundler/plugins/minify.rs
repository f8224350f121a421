//! Script compression with swc.
//!
//! Each bundle is parsed as a script, compressed and mangled by
//! `swc_ecma_minifier`, then printed by the minifying code generator. The
//! generator's position table becomes the bundle's column map, so source
//! maps keep pointing at module lines after the bundle collapses.

use super::Pass;
use crate::bundler::build::{Build, ColumnOrigin};
use crate::config::MinifyConfig;
use crate::error::BuildError;
use serde_json::json;
use swc_common::{sync::Lrc, FileName, Globals, Mark, SourceMap, GLOBALS};
use swc_ecma_ast::{EsVersion, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_minifier::optimize;
use swc_ecma_minifier::option::terser::TerserCompressorOptions;
use swc_ecma_minifier::option::{ExtraOptions, MangleOptions, MinifyOptions};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};
use swc_ecma_transforms_base::{fixer::fixer, resolver};
use swc_ecma_visit::FoldWith;

pub struct MinifyPass {
    /// Let the compressor rewrite comparisons (`!(a < b)` to `a >= b`).
    /// Unsafe for NaN operands.
    comparisons: bool,
    ascii_only: bool,
}

/// A minified script.
#[derive(Debug, Clone)]
pub struct Minified {
    pub code: String,
    /// `(output line, output column, input line, input column)`, 0-based
    /// and sorted by output position.
    pub positions: Vec<(u32, u32, u32, u32)>,
}

impl MinifyPass {
    #[must_use]
    pub fn new(config: &MinifyConfig) -> Self {
        Self {
            comparisons: config.comparisons,
            ascii_only: config.ascii_only,
        }
    }

    /// Compress `code`, a complete script.
    pub fn minify(&self, code: &str) -> Result<Minified, String> {
        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(
            Lrc::new(FileName::Custom("bundle.js".to_string())),
            code.to_string(),
        );

        let lexer = Lexer::new(
            Syntax::Es(EsSyntax::default()),
            EsVersion::EsNext,
            StringInput::from(&*fm),
            None,
        );
        let mut parser = Parser::new_from(lexer);
        let script = parser
            .parse_script()
            .map_err(|e| format!("parse error: {:?}", e.kind()))?;
        let errors: Vec<String> = parser
            .take_errors()
            .iter()
            .map(|e| format!("{:?}", e.kind()))
            .collect();
        if !errors.is_empty() {
            return Err(format!("parse error: {}", errors.join(", ")));
        }

        let compress: TerserCompressorOptions =
            serde_json::from_value(json!({ "comparisons": self.comparisons }))
                .map_err(|e| format!("compressor options: {e}"))?;
        let options = MinifyOptions {
            compress: Some(compress.into_config(cm.clone())),
            mangle: Some(MangleOptions::default()),
            ..MinifyOptions::default()
        };

        let program = GLOBALS.set(&Globals::default(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();
            let program = Program::Script(script)
                .fold_with(&mut resolver(unresolved_mark, top_level_mark, false));
            let program = optimize(
                program,
                cm.clone(),
                None,
                None,
                &options,
                &ExtraOptions {
                    unresolved_mark,
                    top_level_mark,
                    mangle_name_cache: None,
                },
            );
            program.fold_with(&mut fixer(None))
        });

        let mut buf = Vec::new();
        let mut emitted = Vec::new();
        {
            let writer = JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut emitted));
            let mut emitter = Emitter {
                cfg: swc_ecma_codegen::Config::default()
                    .with_minify(true)
                    .with_ascii_only(self.ascii_only)
                    .with_target(EsVersion::EsNext),
                cm: cm.clone(),
                comments: None,
                wr: writer,
            };
            emitter
                .emit_program(&program)
                .map_err(|e| format!("emit error: {e}"))?;
        }

        let mut out =
            String::from_utf8(buf).map_err(|e| format!("output is not UTF-8: {e}"))?;
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }

        let starts = line_starts(code);
        let (first, last) = (fm.start_pos.0, fm.end_pos.0);
        let mut positions: Vec<(u32, u32, u32, u32)> = emitted
            .iter()
            .filter(|(pos, _)| pos.0 != 0 && first <= pos.0 && pos.0 <= last)
            .map(|(pos, at)| {
                let offset = (pos.0 - first) as usize;
                let line = starts.partition_point(|&s| s <= offset).saturating_sub(1);
                let column = offset - starts[line];
                (at.line, at.col, line as u32, column as u32)
            })
            .collect();
        positions.sort_unstable();
        positions.dedup_by_key(|p| (p.0, p.1));

        Ok(Minified {
            code: out,
            positions,
        })
    }
}

impl Pass for MinifyPass {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        for bundle in &mut build.bundles {
            let minified = self.minify(&bundle.code).map_err(|message| BuildError::PassFailure {
                pass: "minify",
                message: format!("{}: {message}", bundle.file),
            })?;
            let mut column_map: Vec<ColumnOrigin> = minified
                .positions
                .iter()
                .filter_map(|&(line, column, in_line, in_column)| {
                    bundle
                        .origin_at(in_line, in_column)
                        .map(|origin| ColumnOrigin { line, column, origin })
                })
                .collect();
            column_map.dedup_by(|next, kept| next.line == kept.line && next.origin == kept.origin);

            bundle.code = minified.code;
            bundle.line_map = Vec::new();
            bundle.column_map = column_map;
        }
        Ok(())
    }
}

/// Byte offset of every line start.
fn line_starts(code: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(code.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::build::{Bundle, BundleKind, LineOrigin};
    use crate::config::Mode;
    use std::path::Path;

    fn pass() -> MinifyPass {
        MinifyPass {
            comparisons: false,
            ascii_only: true,
        }
    }

    fn minify(src: &str) -> String {
        pass().minify(src).unwrap().code
    }

    #[test]
    fn test_folds_literal_comparisons() {
        let code = minify(
            "if (\"production\" === \"production\") { a(); }\nif ('a' != \"a\") { b(); }\n",
        );
        assert!(code.contains("a()"), "{code}");
        assert!(!code.contains("b()"), "{code}");
        assert!(!code.contains("production"), "{code}");
    }

    #[test]
    fn test_concatenation_is_not_folded() {
        let code = minify("x = a + \"b\" === \"b\";\n");
        assert!(code.contains("a+\"b\""), "{code}");
        assert!(!code.contains("!1") && !code.contains("false"), "{code}");
    }

    #[test]
    fn test_comments_and_whitespace_are_dropped() {
        let code = minify("/* header\n * more */\nvar a = 1; // one\n\n    var b = 2;\n");
        assert!(!code.contains("header"), "{code}");
        assert!(!code.contains("one"), "{code}");
        assert!(!code.contains("  "), "{code}");
        assert_eq!(code.trim_end().lines().count(), 1, "{code}");
    }

    #[test]
    fn test_locals_are_mangled() {
        let code = minify(
            "function outer() { var longLocalName = 1; return longLocalName + 1; }\nouter();\n",
        );
        assert!(!code.contains("longLocalName"), "{code}");
    }

    #[test]
    fn test_template_text_is_kept() {
        let code = minify("var t = `a\n    b`;\nuse(t);\n");
        assert!(code.contains("    b"), "{code}");
    }

    #[test]
    fn test_ascii_only_escapes() {
        let code = minify("use(\"café 😀\");\n");
        assert!(code.is_ascii(), "{code}");
        assert!(code.contains("caf\\"), "{code}");

        let unicode = MinifyPass {
            comparisons: false,
            ascii_only: false,
        };
        assert!(unicode.minify("use(\"café\");\n").unwrap().code.contains("café"));
    }

    #[test]
    fn test_negated_comparisons_kept_when_disabled() {
        let code = minify("if (!(a < b)) { f(); }\n");
        assert!(!code.contains(">="), "{code}");
        assert!(code.contains("a<b"), "{code}");
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = pass().minify("var = ;\n").unwrap_err();
        assert!(err.starts_with("parse error"), "{err}");
    }

    #[test]
    fn test_column_map_follows_module_lines() {
        let origin = |line| Some(LineOrigin { module: 0, line });
        let mut build = Build::new(Mode::Production, Path::new("/project"), "./", true);
        build.bundles.push(Bundle {
            name: "main".into(),
            file: "static/js/bundle.js".into(),
            kind: BundleKind::Entry,
            code: "// runtime\n\n  first();\n  second();\n".into(),
            line_map: vec![None, None, origin(3), origin(4)],
            column_map: Vec::new(),
            modules: vec![0],
        });
        let p = pass();
        p.run(&mut build).unwrap();

        let bundle = &build.bundles[0];
        assert!(!bundle.code.contains("runtime"));
        assert!(bundle.line_map.is_empty());
        let at = |name: &str| bundle.code.find(name).unwrap() as u32;
        assert_eq!(bundle.origin_at(0, at("first")), origin(3));
        assert_eq!(bundle.origin_at(0, at("second")), origin(4));

        let code = bundle.code.clone();
        p.run(&mut build).unwrap();
        let bundle = &build.bundles[0];
        assert_eq!(bundle.code, code);
        let at = |name: &str| bundle.code.find(name).unwrap() as u32;
        assert_eq!(bundle.origin_at(0, at("first")), origin(3));
        assert_eq!(bundle.origin_at(0, at("second")), origin(4));
    }

    #[test]
    fn test_failure_names_bundle() {
        let mut build = Build::new(Mode::Production, Path::new("/project"), "./", false);
        build.bundles.push(Bundle {
            name: "main".into(),
            file: "static/js/bundle.js".into(),
            kind: BundleKind::Entry,
            code: "function (".into(),
            line_map: Vec::new(),
            column_map: Vec::new(),
            modules: Vec::new(),
        });
        let err = pass().run(&mut build).unwrap_err();
        assert_eq!(err.code(), "PASS_FAILURE");
        assert!(err.to_string().contains("static/js/bundle.js"));
    }
}

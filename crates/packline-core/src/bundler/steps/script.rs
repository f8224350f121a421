//! ES module lowering.
//!
//! Rewrites `import`/`export` syntax, `require()` and `import()` into calls
//! on the module registry. Every edit stays on the line it replaces, so line
//! `n` of the output is line `n` of the source and source maps stay exact.
//!
//! Imported bindings are copied when the import statement runs, not bound
//! live; exports are exposed through getters and therefore are live.

use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use super::super::graph::DependencyTarget;
use crate::js::{self, Token, TokenKind};
use serde_json::Value;

pub struct ScriptStep;

impl TransformStep for ScriptStep {
    fn name(&self) -> &'static str {
        "script"
    }

    fn run(
        &self,
        input: ModuleValue,
        _options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let source = match &input {
            ModuleValue::Style { .. } => {
                return Err(StepError::failed("script step cannot consume a stylesheet"))
            }
            other => other.text(),
        };
        let lowered = Lowering::new(&source, cx).run()?;
        cx.preserve_lines();
        if lowered.hot_accepting {
            cx.accept_hot();
        }
        Ok(ModuleValue::Script(lowered.code))
    }
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

struct Lowered {
    code: String,
    hot_accepting: bool,
}

struct Lowering<'s, 'c, 'a> {
    source: &'s str,
    tokens: Vec<Token>,
    /// Bracket depth before each token.
    depth: Vec<usize>,
    cx: &'c StepContext<'a>,
    edits: Vec<Edit>,
    /// Exported name to local expression.
    getters: Vec<(String, String)>,
    esm: bool,
    hot_accepting: bool,
    temps: usize,
}

impl<'s, 'c, 'a> Lowering<'s, 'c, 'a> {
    fn new(source: &'s str, cx: &'c StepContext<'a>) -> Self {
        let tokens = js::tokenize(source);
        let mut depth = Vec::with_capacity(tokens.len());
        let mut level = 0usize;
        for tok in &tokens {
            let punct = (tok.kind == TokenKind::Punct).then(|| source.as_bytes()[tok.start]);
            if matches!(punct, Some(b'}' | b')' | b']')) {
                level = level.saturating_sub(1);
            }
            depth.push(level);
            if matches!(punct, Some(b'{' | b'(' | b'[')) {
                level += 1;
            }
        }
        Self {
            source,
            tokens,
            depth,
            cx,
            edits: Vec::new(),
            getters: Vec::new(),
            esm: false,
            hot_accepting: false,
            temps: 0,
        }
    }

    fn run(mut self) -> Result<Lowered, StepError> {
        let mut i = 0;
        while i < self.tokens.len() {
            let tok = self.tokens[i];
            if tok.kind != TokenKind::Word || self.punct_at(i.wrapping_sub(1), b'.') {
                i += 1;
                continue;
            }
            i = match tok.text(self.source) {
                "import" if self.punct_at(i + 1, b'(') => self.dynamic_import(i)?,
                "import" if self.punct_at(i + 1, b'.') => i + 1,
                "import" if self.depth[i] == 0 => self.import_statement(i)?,
                "export" if self.depth[i] == 0 => self.export_statement(i)?,
                "require" => self.require_call(i)?,
                "module" => {
                    if self.is_hot_accept(i) {
                        self.hot_accepting = true;
                    }
                    i + 1
                }
                _ => i + 1,
            };
        }
        let hot_accepting = self.hot_accepting;
        Ok(Lowered {
            code: self.apply(),
            hot_accepting,
        })
    }

    fn text(&self, i: usize) -> &'s str {
        self.tokens.get(i).map_or("", |t| t.text(self.source))
    }

    fn punct_at(&self, i: usize, punct: u8) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_punct(self.source, punct))
    }

    fn word_at(&self, i: usize, word: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_word(self.source, word))
    }

    fn string_at(&self, i: usize) -> Option<String> {
        self.tokens
            .get(i)
            .filter(|t| t.is_string_literal(self.source))
            .map(|t| js::string_value(t.text(self.source)))
    }

    /// Index of the token after a statement ending at `last`, swallowing a
    /// trailing `;`.
    fn statement_end(&self, last: usize) -> (usize, usize) {
        if self.punct_at(last + 1, b';') {
            (self.tokens[last + 1].end, last + 2)
        } else {
            (self.tokens[last].end, last + 1)
        }
    }

    fn edit(&mut self, start: usize, end: usize, text: impl Into<String>) {
        self.edits.push(Edit {
            start,
            end,
            text: text.into(),
        });
    }

    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("__pl_m{}", self.temps)
    }

    /// Expression evaluating to the exports of `specifier`.
    fn require_target(&self, specifier: &str) -> Result<String, StepError> {
        Ok(match &self.cx.dependency(specifier)?.target {
            DependencyTarget::Module(id) => format!("require({})", js::quote(id)),
            DependencyTarget::External(global) => {
                format!("__packline.external({})", js::quote(global))
            }
            DependencyTarget::Ignored => "({})".to_string(),
        })
    }

    /// `import("x")` becomes a chunk load.
    fn dynamic_import(&mut self, i: usize) -> Result<usize, StepError> {
        let Some(specifier) = self.string_at(i + 2).filter(|_| self.punct_at(i + 3, b')')) else {
            return Ok(i + 1);
        };
        let replacement = match &self.cx.dependency(&specifier)?.target {
            DependencyTarget::Module(id) => format!("__packline.load({})", js::quote(id)),
            DependencyTarget::External(global) => format!(
                "Promise.resolve(__packline.interop(__packline.external({})))",
                js::quote(global)
            ),
            DependencyTarget::Ignored => "Promise.resolve(__packline.interop({}))".to_string(),
        };
        self.edit(self.tokens[i].start, self.tokens[i + 3].end, replacement);
        Ok(i + 4)
    }

    fn require_call(&mut self, i: usize) -> Result<usize, StepError> {
        if !self.punct_at(i + 1, b'(') || !self.punct_at(i + 3, b')') {
            return Ok(i + 1);
        }
        let Some(specifier) = self.string_at(i + 2) else {
            return Ok(i + 1);
        };
        let target = self.require_target(&specifier)?;
        self.edit(self.tokens[i].start, self.tokens[i + 3].end, target);
        Ok(i + 4)
    }

    /// `module.hot.accept`
    fn is_hot_accept(&self, i: usize) -> bool {
        self.punct_at(i + 1, b'.')
            && self.word_at(i + 2, "hot")
            && self.punct_at(i + 3, b'.')
            && self.word_at(i + 4, "accept")
    }

    fn import_statement(&mut self, i: usize) -> Result<usize, StepError> {
        let start = self.tokens[i].start;

        // import "x";
        if let Some(specifier) = self.string_at(i + 1) {
            let target = self.require_target(&specifier)?;
            let (end, next) = self.statement_end(i + 1);
            self.esm = true;
            self.edit(start, end, format!("{target};"));
            return Ok(next);
        }

        let Some(from) = self.find_from(i + 1) else {
            return Ok(i + 1);
        };
        let Some(specifier) = self.string_at(from + 1) else {
            return Ok(i + 1);
        };

        let mut default = None;
        let mut namespace = None;
        let mut named: Vec<(String, String)> = Vec::new();
        let mut j = i + 1;
        while j < from {
            if self.punct_at(j, b'*') && self.word_at(j + 1, "as") {
                namespace = Some(self.text(j + 2).to_string());
                j += 3;
            } else if self.punct_at(j, b'{') {
                let close = self.matching_close(j);
                named.extend(self.specifier_list(j + 1, close));
                j = close + 1;
            } else if self.tokens[j].kind == TokenKind::Word {
                default = Some(self.text(j).to_string());
                j += 1;
            } else {
                j += 1;
            }
        }

        let target = self.require_target(&specifier)?;
        let replacement = match (&default, &namespace, named.is_empty()) {
            (None, Some(ns), true) => format!("var {ns} = __packline.interop({target});"),
            _ => {
                let temp = self.temp();
                let mut decl = format!("var {temp} = __packline.interop({target})");
                if let Some(name) = default {
                    decl.push_str(&format!(", {name} = {temp}[\"default\"]"));
                }
                if let Some(ns) = namespace {
                    decl.push_str(&format!(", {ns} = {temp}"));
                }
                for (imported, local) in named {
                    decl.push_str(&format!(", {local} = {temp}[{}]", js::quote(&imported)));
                }
                decl.push(';');
                decl
            }
        };
        let (end, next) = self.statement_end(from + 1);
        self.esm = true;
        self.edit(start, end, replacement);
        Ok(next)
    }

    fn export_statement(&mut self, i: usize) -> Result<usize, StepError> {
        let export = self.tokens[i];
        self.esm = true;

        match self.text(i + 1) {
            "default" => {
                let default = self.tokens[i + 1];
                let mut k = i + 2;
                if self.word_at(k, "async") && self.word_at(k + 1, "function") {
                    k += 1;
                }
                let declared = match self.text(k) {
                    "function" => {
                        let mut n = k + 1;
                        if self.punct_at(n, b'*') {
                            n += 1;
                        }
                        self.declared_name(n).filter(|_| self.punct_at(n + 1, b'('))
                    }
                    "class" => self.declared_name(k + 1).filter(|name| name != "extends"),
                    _ => None,
                };
                match declared {
                    Some(name) => {
                        self.edit(export.start, self.tokens[i + 2].start, "");
                        self.getters.push(("default".to_string(), name));
                    }
                    None => self.edit(export.start, default.end, "exports.default ="),
                }
                Ok(i + 2)
            }
            "var" | "let" | "const" => {
                self.edit(export.start, self.tokens[i + 1].start, "");
                let names = self.declarator_names(i + 2);
                self.getters.extend(names.into_iter().map(|n| (n.clone(), n)));
                Ok(i + 1)
            }
            "function" | "class" | "async" => {
                self.edit(export.start, self.tokens[i + 1].start, "");
                let mut k = i + 1;
                if self.word_at(k, "async") {
                    k += 1;
                }
                k += 1;
                if self.punct_at(k, b'*') {
                    k += 1;
                }
                if let Some(name) = self.declared_name(k) {
                    self.getters.push((name.clone(), name));
                }
                Ok(i + 1)
            }
            "{" => {
                let close = self.matching_close(i + 1);
                let pairs = self.specifier_list(i + 2, close);
                if self.word_at(close + 1, "from") {
                    let Some(specifier) = self.string_at(close + 2) else {
                        return Ok(close + 1);
                    };
                    let target = self.require_target(&specifier)?;
                    let map = name_map(pairs.iter().map(|(from, to)| (to.as_str(), from.as_str())));
                    let (end, next) = self.statement_end(close + 2);
                    self.edit(
                        export.start,
                        end,
                        format!("__packline.reexport(exports, {target}, {map});"),
                    );
                    Ok(next)
                } else {
                    let (end, next) = self.statement_end(close);
                    self.edit(export.start, end, "");
                    self.getters
                        .extend(pairs.into_iter().map(|(local, exported)| (exported, local)));
                    Ok(next)
                }
            }
            "*" => {
                let (names, from) = if self.word_at(i + 2, "as") {
                    let alias = self.text(i + 3).to_string();
                    (Some(name_map([(alias.as_str(), "*")])), i + 4)
                } else {
                    (None, i + 2)
                };
                if !self.word_at(from, "from") {
                    return Ok(i + 1);
                }
                let Some(specifier) = self.string_at(from + 1) else {
                    return Ok(i + 1);
                };
                let target = self.require_target(&specifier)?;
                let call = match names {
                    Some(map) => format!("__packline.reexport(exports, {target}, {map});"),
                    None => format!("__packline.reexport(exports, {target});"),
                };
                let (end, next) = self.statement_end(from + 1);
                self.edit(export.start, end, call);
                Ok(next)
            }
            _ => Ok(i + 1),
        }
    }

    fn declared_name(&self, i: usize) -> Option<String> {
        let tok = self.tokens.get(i)?;
        let text = tok.text(self.source);
        (tok.kind == TokenKind::Word && !text.as_bytes()[0].is_ascii_digit())
            .then(|| text.to_string())
    }

    /// `from` keyword of an import clause starting at `start`.
    fn find_from(&self, start: usize) -> Option<usize> {
        let limit = (start + 256).min(self.tokens.len());
        (start..limit)
            .take_while(|&j| !self.punct_at(j, b';'))
            .find(|&j| self.word_at(j, "from") && self.string_at(j + 1).is_some())
    }

    /// Index of the bracket closing the one at `open`.
    fn matching_close(&self, open: usize) -> usize {
        let level = self.depth[open];
        (open + 1..self.tokens.len())
            .find(|&j| self.depth[j] == level && self.tokens[j].kind == TokenKind::Punct)
            .unwrap_or(self.tokens.len() - 1)
    }

    /// `a, b as c, "d" as e` between `start` and `end` as (source, alias).
    fn specifier_list(&self, start: usize, end: usize) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut j = start;
        while j < end {
            let tok = self.tokens[j];
            let name = match tok.kind {
                TokenKind::Word => tok.text(self.source).to_string(),
                TokenKind::Str => js::string_value(tok.text(self.source)),
                _ => {
                    j += 1;
                    continue;
                }
            };
            if self.word_at(j + 1, "as") && j + 2 < end {
                let alias = match self.tokens[j + 2].kind {
                    TokenKind::Str => js::string_value(self.text(j + 2)),
                    _ => self.text(j + 2).to_string(),
                };
                pairs.push((name, alias));
                j += 3;
            } else {
                pairs.push((name.clone(), name));
                j += 1;
            }
        }
        pairs
    }

    /// Names bound by `var|let|const` declarators starting at `start`.
    fn declarator_names(&self, start: usize) -> Vec<String> {
        let base = self.depth.get(start).copied().unwrap_or(0);
        let mut names = Vec::new();
        let mut expect_name = true;
        let mut j = start;
        while j < self.tokens.len() {
            let level = self.depth[j];
            if level < base {
                break;
            }
            if level == base {
                if self.punct_at(j, b';') {
                    break;
                }
                if j > start && !expect_name && self.starts_line(j) && self.ends_expression(j - 1)
                {
                    break;
                }
                if self.punct_at(j, b',') {
                    expect_name = true;
                    j += 1;
                    continue;
                }
                if expect_name {
                    expect_name = false;
                    if self.punct_at(j, b'{') || self.punct_at(j, b'[') {
                        let close = self.matching_close(j);
                        self.pattern_names(j + 1, close, &mut names);
                        j = close + 1;
                        continue;
                    }
                    if let Some(name) = self.declared_name(j) {
                        names.push(name);
                    }
                }
            }
            j += 1;
        }
        names
    }

    /// Binding names inside a destructuring pattern.
    fn pattern_names(&self, start: usize, end: usize, names: &mut Vec<String>) {
        let mut j = start;
        while j < end {
            let level = self.depth[j];
            if self.punct_at(j, b'=') {
                // Skip the default value.
                j += 1;
                while j < end && !(self.depth[j] == level && self.punct_at(j, b',')) {
                    j += 1;
                }
                continue;
            }
            if self.tokens[j].kind == TokenKind::Word
                && !self.punct_at(j + 1, b':')
                && (self.punct_at(j + 1, b',')
                    || self.punct_at(j + 1, b'}')
                    || self.punct_at(j + 1, b']')
                    || self.punct_at(j + 1, b'=')
                    || j + 1 == end)
            {
                if let Some(name) = self.declared_name(j) {
                    names.push(name);
                }
            }
            j += 1;
        }
    }

    fn starts_line(&self, j: usize) -> bool {
        j > 0
            && self.source[self.tokens[j - 1].end..self.tokens[j].start].contains('\n')
    }

    /// Whether a statement may end after token `j`.
    fn ends_expression(&self, j: usize) -> bool {
        let tok = self.tokens[j];
        match tok.kind {
            TokenKind::Punct => matches!(self.source.as_bytes()[tok.start], b')' | b']' | b'}'),
            _ => true,
        }
    }

    /// Apply edits, keeping the newlines of every replaced span.
    fn apply(mut self) -> String {
        self.edits.sort_by_key(|e| e.start);
        let mut out = String::with_capacity(self.source.len() + 128);

        if self.esm {
            out.push_str("exports.__esModule = true;");
            if !self.getters.is_empty() {
                let body: Vec<String> = self
                    .getters
                    .iter()
                    .map(|(name, local)| {
                        format!("{}: function () {{ return {local}; }}", js::quote(name))
                    })
                    .collect();
                out.push_str(" __packline.export(exports, {");
                out.push_str(&body.join(", "));
                out.push_str("});");
            }
            out.push(' ');
        }

        let mut pos = 0;
        for edit in &self.edits {
            if edit.start < pos {
                continue;
            }
            out.push_str(&self.source[pos..edit.start]);
            out.push_str(&edit.text);
            let newlines = self.source[edit.start..edit.end].matches('\n').count();
            out.extend(std::iter::repeat('\n').take(newlines));
            pos = edit.end;
        }
        out.push_str(&self.source[pos..]);
        out
    }
}

/// `{"alias": "source"}` object literal.
fn name_map<'n>(pairs: impl IntoIterator<Item = (&'n str, &'n str)>) -> String {
    let body: Vec<String> = pairs
        .into_iter()
        .map(|(alias, from)| format!("{}: {}", js::quote(alias), js::quote(from)))
        .collect();
    format!("{{{}}}", body.join(", "))
}

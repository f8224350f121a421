//! The build snapshot.
//!
//! A [`Build`] is produced by the assembler, completed by the plugin passes
//! and then sealed: source maps are rendered and every output is frozen into
//! a single file table. A sealed build is never mutated again; the dev
//! session shares it behind an `Arc`.

use super::graph::ModuleKind;
use super::sourcemap::SourceMapBuilder;
use super::steps::mime_type;
use crate::config::Mode;
use crate::error::Diagnostic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    /// One per declared entry.
    Entry,
    /// Explicit chunk declaration, loaded before entries.
    Named,
    /// Target of a dynamic `import()`, loaded on demand.
    Async,
}

/// Where a generated line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOrigin {
    /// Traversal index of the module.
    pub module: usize,
    /// 0-based source line.
    pub line: u32,
}

/// Origin of a generated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOrigin {
    /// 0-based generated line.
    pub line: u32,
    /// 0-based generated column.
    pub column: u32,
    pub origin: LineOrigin,
}

/// A script bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    /// Output path relative to the output root.
    pub file: String,
    pub kind: BundleKind,
    pub code: String,
    /// One slot per generated line.
    pub line_map: Vec<Option<LineOrigin>>,
    /// Position-level origins, sorted by position. Supersedes `line_map`
    /// when non-empty.
    pub column_map: Vec<ColumnOrigin>,
    /// Traversal indices of the modules defined in this bundle.
    pub modules: Vec<usize>,
}

impl Bundle {
    /// Source line that generated position `line:column` came from.
    #[must_use]
    pub fn origin_at(&self, line: u32, column: u32) -> Option<LineOrigin> {
        if self.column_map.is_empty() {
            return self.line_map.get(line as usize).copied().flatten();
        }
        let end = self
            .column_map
            .partition_point(|m| (m.line, m.column) <= (line, column));
        let mapping = self.column_map[..end].last()?;
        (mapping.line == line).then_some(mapping.origin)
    }
}

/// Extracted stylesheet of one bundle.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub bundle: String,
    pub file: String,
    pub css: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOrigin {
    /// Emitted by a module's chain.
    Module,
    /// Generated icon or manifest.
    Icons,
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub file: String,
    pub bytes: Arc<Vec<u8>>,
    pub origin: AssetOrigin,
}

/// Generated HTML document.
#[derive(Debug, Clone)]
pub struct Page {
    pub file: String,
    pub html: String,
}

/// Per-module record kept for change classification and hot replacement.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: String,
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub index: usize,
    /// Digest of the module's compiled output.
    pub digest: String,
    /// Ids of referenced modules.
    pub dependencies: Vec<String>,
    pub hot_accepting: bool,
    /// Registry definition, as it appears in the bundle.
    pub code: String,
    pub source: Arc<Vec<u8>>,
}

/// Stylesheet fragment waiting for the extraction pass.
#[derive(Debug, Clone)]
pub struct PendingStyle {
    pub bundle: String,
    /// Traversal index of the contributing module.
    pub index: usize,
    pub module: String,
    pub css: String,
}

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct Build {
    pub mode: Mode,
    pub root: PathBuf,
    pub public_path: String,
    pub bundles: Vec<Bundle>,
    pub stylesheets: Vec<Stylesheet>,
    pub assets: Vec<Asset>,
    pub pages: Vec<Page>,
    pub modules: Vec<ModuleRecord>,
    pub pending_styles: Vec<PendingStyle>,
    pub diagnostics: Vec<Diagnostic>,
    pub sourcemap: bool,
    files: BTreeMap<String, Arc<Vec<u8>>>,
}

impl Build {
    #[must_use]
    pub fn new(mode: Mode, root: &Path, public_path: &str, sourcemap: bool) -> Self {
        Self {
            mode,
            root: root.to_path_buf(),
            public_path: public_path.to_string(),
            bundles: Vec::new(),
            stylesheets: Vec::new(),
            assets: Vec::new(),
            pages: Vec::new(),
            modules: Vec::new(),
            pending_styles: Vec::new(),
            diagnostics: Vec::new(),
            sourcemap,
            files: BTreeMap::new(),
        }
    }

    /// Render source maps and freeze every output into the file table.
    #[must_use]
    pub fn seal(mut self) -> Self {
        let mut files = BTreeMap::new();

        for bundle in &self.bundles {
            let mut code = bundle.code.clone();
            if self.sourcemap {
                let map_file = format!("{}.map", bundle.file);
                let base = bundle.file.rsplit('/').next().unwrap_or(&bundle.file);
                files.insert(
                    map_file,
                    Arc::new(self.source_map(bundle, base).into_bytes()),
                );
                if !code.ends_with('\n') {
                    code.push('\n');
                }
                code.push_str(&format!("//# sourceMappingURL={base}.map\n"));
            }
            files.insert(bundle.file.clone(), Arc::new(code.into_bytes()));
        }
        for sheet in &self.stylesheets {
            files.insert(sheet.file.clone(), Arc::new(sheet.css.clone().into_bytes()));
        }
        for asset in &self.assets {
            files.insert(asset.file.clone(), Arc::clone(&asset.bytes));
        }
        for page in &self.pages {
            files.insert(page.file.clone(), Arc::new(page.html.clone().into_bytes()));
        }

        self.files = files;
        self
    }

    fn source_map(&self, bundle: &Bundle, file: &str) -> String {
        let mut builder = SourceMapBuilder::new();
        let lines = bundle
            .line_map
            .iter()
            .enumerate()
            .filter_map(|(line, origin)| origin.map(|o| (line as u32, 0, o)));
        let columns = bundle.column_map.iter().map(|m| (m.line, m.column, m.origin));
        for (line, column, origin) in lines.chain(columns) {
            let Some(record) = self.modules.get(origin.module) else {
                continue;
            };
            let source = String::from_utf8_lossy(&record.source);
            let idx = builder.add_source(&self.source_name(record), &source);
            builder.add_mapping(line, column, idx, origin.line);
        }
        builder.generate(file)
    }

    /// Development maps point at absolute paths, production maps at paths
    /// relative to `src/`.
    fn source_name(&self, record: &ModuleRecord) -> String {
        if self.mode.is_production() {
            match record.id.strip_prefix("src/") {
                Some(rest) => rest.to_string(),
                None => format!("../{}", record.id),
            }
        } else {
            record.path.to_string_lossy().replace('\\', "/")
        }
    }

    /// Contents of an output file, once sealed.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&Arc<Vec<u8>>> {
        self.files.get(path.trim_start_matches('/'))
    }

    /// Every output file in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &Arc<Vec<u8>>)> {
        self.files.iter().map(|(name, bytes)| (name.as_str(), bytes))
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        !self.files.is_empty()
    }

    /// The document served for every unknown route.
    #[must_use]
    pub fn html_shell(&self) -> Option<&str> {
        self.pages
            .iter()
            .find(|p| p.file == "index.html")
            .or_else(|| self.pages.first())
            .map(|p| p.html.as_str())
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<&ModuleRecord> {
        self.modules.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.name == name)
    }
}

/// Content type for an output path.
#[must_use]
pub fn content_type(path: &str) -> &'static str {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, ext)) => mime_type(ext),
        None => mime_type(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, source: &str) -> ModuleRecord {
        ModuleRecord {
            id: id.to_string(),
            path: PathBuf::from("/project").join(id),
            kind: ModuleKind::Script,
            index: 0,
            digest: String::new(),
            dependencies: Vec::new(),
            hot_accepting: false,
            code: String::new(),
            source: Arc::new(source.as_bytes().to_vec()),
        }
    }

    fn sample(mode: Mode, sourcemap: bool) -> Build {
        let mut build = Build::new(mode, Path::new("/project"), "./", sourcemap);
        build.modules.push(record("src/index.js", "a();\nb();\n"));
        build.bundles.push(Bundle {
            name: "main".into(),
            file: "static/js/bundle.js".into(),
            kind: BundleKind::Entry,
            code: "define {\na();\nb();\n}\n".into(),
            line_map: vec![
                None,
                Some(LineOrigin { module: 0, line: 0 }),
                Some(LineOrigin { module: 0, line: 1 }),
                None,
            ],
            column_map: Vec::new(),
            modules: vec![0],
        });
        build.pages.push(Page {
            file: "index.html".into(),
            html: "<html></html>".into(),
        });
        build
    }

    #[test]
    fn test_seal_adds_source_map() {
        let build = sample(Mode::Development, true).seal();
        let code = String::from_utf8(build.file("static/js/bundle.js").unwrap().to_vec()).unwrap();
        assert!(code.ends_with("//# sourceMappingURL=bundle.js.map\n"));

        let map: serde_json::Value =
            serde_json::from_slice(build.file("static/js/bundle.js.map").unwrap()).unwrap();
        assert_eq!(map["sources"][0], "/project/src/index.js");
        assert_eq!(map["mappings"], ";AAAA;AACA");
    }

    #[test]
    fn test_column_map_supersedes_lines() {
        let mut build = sample(Mode::Production, true);
        let origin = |line| LineOrigin { module: 0, line };
        build.bundles[0].code = "a(),b();\n".into();
        build.bundles[0].line_map.clear();
        build.bundles[0].column_map = vec![
            ColumnOrigin { line: 0, column: 0, origin: origin(0) },
            ColumnOrigin { line: 0, column: 4, origin: origin(1) },
        ];
        assert_eq!(build.bundles[0].origin_at(0, 2), Some(origin(0)));
        assert_eq!(build.bundles[0].origin_at(0, 6), Some(origin(1)));
        assert_eq!(build.bundles[0].origin_at(1, 0), None);

        let build = build.seal();
        let map: serde_json::Value =
            serde_json::from_slice(build.file("static/js/bundle.js.map").unwrap()).unwrap();
        assert_eq!(map["mappings"], "AAAA,IACA");
    }

    #[test]
    fn test_production_sources_are_relative_to_src() {
        let build = sample(Mode::Production, true).seal();
        let map: serde_json::Value =
            serde_json::from_slice(build.file("static/js/bundle.js.map").unwrap()).unwrap();
        assert_eq!(map["sources"][0], "index.js");
    }

    #[test]
    fn test_no_map_when_disabled() {
        let build = sample(Mode::Production, false).seal();
        assert!(build.file("static/js/bundle.js.map").is_none());
        let code = build.file("/static/js/bundle.js").unwrap();
        assert!(!String::from_utf8_lossy(code).contains("sourceMappingURL"));
    }

    #[test]
    fn test_html_shell_and_content_types() {
        let build = sample(Mode::Development, false).seal();
        assert_eq!(build.html_shell(), Some("<html></html>"));
        assert_eq!(content_type("static/js/bundle.js"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("static/assets/a.b.png"), "image/png");
        assert_eq!(content_type("LICENSE"), "application/octet-stream");
    }
}

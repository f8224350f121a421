//! Change classification for the notification channel.
//!
//! After a rebuild is published, the previous and the new build are
//! compared. When every changed module reaches a hot boundary (a style
//! module or a module calling `module.hot.accept`), clients replace those
//! modules in place; anything else reloads the page.

use crate::bundler::Build;
use crate::error::BuildError;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Message sent to connected clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    Connected {
        build: Option<u64>,
    },
    ModuleReplace {
        build: u64,
        /// Changed module ids, in traversal order.
        modules: Vec<String>,
        /// Modules to re-evaluate.
        boundaries: Vec<String>,
    },
    FullReload {
        build: u64,
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Notification {
    #[must_use]
    pub fn error(err: &BuildError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}

/// Compare `prev` and `next`; `None` when no module output changed.
#[must_use]
pub fn classify(prev: &Build, next: &Build, ticket: u64) -> Option<Notification> {
    let reload = |reason: String| {
        Some(Notification::FullReload {
            build: ticket,
            reason,
        })
    };

    if prev.html_shell() != next.html_shell() {
        return reload("HTML shell changed".to_string());
    }

    let prev_assets: FxHashMap<&str, &[u8]> = prev
        .assets
        .iter()
        .map(|a| (a.file.as_str(), a.bytes.as_slice()))
        .collect();
    if let Some(asset) = next
        .assets
        .iter()
        .find(|a| prev_assets.get(a.file.as_str()) != Some(&a.bytes.as_slice()))
    {
        return reload(format!("asset {} changed", asset.file));
    }

    let prev_files: Vec<&str> = prev.bundles.iter().map(|b| b.file.as_str()).collect();
    let next_files: Vec<&str> = next.bundles.iter().map(|b| b.file.as_str()).collect();
    if prev_files != next_files {
        return reload("bundle layout changed".to_string());
    }
    if prev.stylesheets.iter().map(|s| &s.css).ne(next.stylesheets.iter().map(|s| &s.css)) {
        return reload("extracted stylesheet changed".to_string());
    }

    let prev_digests: FxHashMap<&str, &str> = prev
        .modules
        .iter()
        .map(|m| (m.id.as_str(), m.digest.as_str()))
        .collect();
    let changed: Vec<&str> = next
        .modules
        .iter()
        .filter(|m| prev_digests.get(m.id.as_str()) != Some(&m.digest.as_str()))
        .map(|m| m.id.as_str())
        .collect();
    if changed.is_empty() {
        return None;
    }

    let mut boundaries = Vec::new();
    for id in &changed {
        match find_boundaries(next, id) {
            Some(found) => {
                for b in found {
                    if !boundaries.contains(&b) {
                        boundaries.push(b);
                    }
                }
            }
            None => return reload(format!("{id} has no hot boundary")),
        }
    }
    boundaries.sort_by_key(|id| next.record(id).map_or(usize::MAX, |r| r.index));

    Some(Notification::ModuleReplace {
        build: ticket,
        modules: changed.into_iter().map(str::to_string).collect(),
        boundaries,
    })
}

/// Nearest accepting modules above `id`; `None` when some import path
/// reaches an entry without passing one.
fn find_boundaries(build: &Build, id: &str) -> Option<Vec<String>> {
    let mut importers: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for record in &build.modules {
        for dep in &record.dependencies {
            importers.entry(dep.as_str()).or_default().push(record.id.as_str());
        }
    }

    let mut found = Vec::new();
    let mut seen = FxHashSet::default();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let record = build.record(current)?;
        if record.hot_accepting {
            found.push(current.to_string());
            continue;
        }
        match importers.get(current) {
            Some(parents) if !parents.is_empty() => stack.extend(parents.iter().copied()),
            _ => return None,
        }
    }
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::build::{Asset, AssetOrigin, ModuleRecord, Page};
    use crate::bundler::graph::ModuleKind;
    use crate::config::Mode;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn record(index: usize, id: &str, digest: &str, deps: &[&str], hot: bool) -> ModuleRecord {
        ModuleRecord {
            id: id.to_string(),
            path: PathBuf::from("/project").join(id),
            kind: ModuleKind::from_path(Path::new(id)),
            index,
            digest: digest.to_string(),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            hot_accepting: hot,
            code: String::new(),
            source: Arc::new(Vec::new()),
        }
    }

    fn build(app_js: &str, app_scss: &str, util: &str) -> Build {
        let mut build = Build::new(Mode::Development, Path::new("/project"), "/", false);
        build.modules = vec![
            record(0, "src/index.js", "i", &["src/App.js"], false),
            record(1, "src/App.js", app_js, &["src/App.scss", "src/util.js"], false),
            record(2, "src/App.scss", app_scss, &[], true),
            record(3, "src/util.js", util, &[], false),
        ];
        build.pages.push(Page {
            file: "index.html".into(),
            html: "<html></html>".into(),
        });
        build
    }

    #[test]
    fn test_style_change_is_hot() {
        let prev = build("a", "s1", "u");
        let next = build("a", "s2", "u");
        assert_eq!(
            classify(&prev, &next, 2),
            Some(Notification::ModuleReplace {
                build: 2,
                modules: vec!["src/App.scss".into()],
                boundaries: vec!["src/App.scss".into()],
            })
        );
    }

    #[test]
    fn test_change_without_boundary_reloads() {
        let prev = build("a", "s", "u1");
        let next = build("a", "s", "u2");
        assert!(matches!(
            classify(&prev, &next, 3),
            Some(Notification::FullReload { build: 3, ref reason }) if reason.contains("src/util.js")
        ));
    }

    #[test]
    fn test_accepting_importer_is_the_boundary() {
        let prev = build("a", "s", "u1");
        let mut next = build("a", "s", "u2");
        next.modules[1].hot_accepting = true;
        match classify(&prev, &next, 4) {
            Some(Notification::ModuleReplace { boundaries, .. }) => {
                assert_eq!(boundaries, vec!["src/App.js".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shell_and_asset_changes_reload() {
        let prev = build("a", "s", "u");
        let mut next = build("a", "s", "u");
        next.pages[0].html = "<html><body></body></html>".into();
        assert!(matches!(classify(&prev, &next, 5), Some(Notification::FullReload { .. })));

        let mut next = build("a", "s", "u");
        next.assets.push(Asset {
            file: "static/assets/logo.png".into(),
            bytes: Arc::new(vec![1]),
            origin: AssetOrigin::Module,
        });
        assert!(matches!(classify(&prev, &next, 6), Some(Notification::FullReload { .. })));
    }

    #[test]
    fn test_unchanged_build_sends_nothing() {
        assert_eq!(classify(&build("a", "s", "u"), &build("a", "s", "u"), 7), None);
    }

    #[test]
    fn test_wire_format() {
        let json = Notification::ModuleReplace {
            build: 2,
            modules: vec!["src/App.scss".into()],
            boundaries: vec!["src/App.scss".into()],
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"module-replace","build":2,"modules":["src/App.scss"],"boundaries":["src/App.scss"]}"#
        );
        assert_eq!(
            Notification::Connected { build: None }.to_json(),
            r#"{"type":"connected","build":null}"#
        );
    }
}

//! Import specifier resolution.
//!
//! Resolves import specifiers to files on disk.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `react`, `@scope/pkg`, `assets/logo.svg`, searched in every
//!   `resolve.modules` directory in order. A `node_modules` entry walks up
//!   from the importing file to the project root.
//!
//! Externals and ignore rules are applied before any lookup. Paths are
//! normalized lexically and keep the letter case they were requested with.

use crate::config::PipelineConfig;
use crate::error::BuildError;
use packline_util::fs::normalize;
use regex_lite::Regex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Outcome of resolving a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    File(PathBuf),
    /// Provided at runtime by the named global.
    External(String),
    /// Replaced by an empty module.
    Ignored,
}

/// Error during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub specifier: String,
    /// The location that was looked up for path-like specifiers.
    pub attempted: Option<PathBuf>,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.attempted {
            Some(path) => write!(f, "cannot resolve '{}' ({})", self.specifier, path.display()),
            None => write!(f, "cannot resolve '{}'", self.specifier),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Import resolver.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    modules: Vec<String>,
    extensions: Vec<String>,
    externals: BTreeMap<String, String>,
    ignore: Vec<(Regex, Regex)>,
    /// (importer directory, specifier) to resolved file.
    cache: RwLock<FxHashMap<(PathBuf, String), PathBuf>>,
}

impl Resolver {
    pub fn new(root: &Path, config: &PipelineConfig) -> Result<Self, BuildError> {
        let ignore = config
            .ignore
            .iter()
            .map(|rule| Ok((compile(&rule.request)?, compile(&rule.context)?)))
            .collect::<Result<Vec<_>, BuildError>>()?;

        let mut extensions = config.resolve.extensions.clone();
        if !extensions.iter().any(String::is_empty) {
            extensions.insert(0, String::new());
        }

        Ok(Self {
            root: root.to_path_buf(),
            modules: config.resolve.modules.clone(),
            extensions,
            externals: config.externals.clone(),
            ignore,
            cache: RwLock::new(FxHashMap::default()),
        })
    }

    /// Resolve `specifier` imported from the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<Resolution, ResolveError> {
        if let Some(global) = self.externals.get(specifier) {
            return Ok(Resolution::External(global.clone()));
        }

        let from_dir = from.parent().unwrap_or(&self.root);
        let context = from_dir.to_string_lossy().replace('\\', "/");
        if self
            .ignore
            .iter()
            .any(|(request, ctx)| request.is_match(specifier) && ctx.is_match(&context))
        {
            return Ok(Resolution::Ignored);
        }

        let key = (from_dir.to_path_buf(), specifier.to_string());
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(path) = cached.filter(|p| p.is_file()) {
            return Ok(Resolution::File(path));
        }

        let path = self.resolve_uncached(specifier, from_dir)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, path.clone());
        Ok(Resolution::File(path))
    }

    fn resolve_uncached(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let not_found = |attempted: Option<PathBuf>| ResolveError {
            specifier: specifier.to_string(),
            attempted,
        };

        if is_relative(specifier) {
            let target = normalize(&from_dir.join(specifier));
            return self
                .resolve_file_or_directory(&target)
                .ok_or_else(|| not_found(Some(target)));
        }

        if Path::new(specifier).is_absolute() {
            let target = normalize(Path::new(specifier));
            return self
                .resolve_file_or_directory(&target)
                .ok_or_else(|| not_found(Some(target)));
        }

        for dir in &self.modules {
            let found = if dir == "node_modules" {
                self.resolve_node_modules(specifier, from_dir)
            } else {
                let base = normalize(&self.root.join(dir));
                self.resolve_file_or_directory(&base.join(specifier))
            };
            if let Some(path) = found {
                return Ok(path);
            }
        }

        Err(not_found(None))
    }

    /// Walk up from `from_dir` to the project root looking in `node_modules`.
    fn resolve_node_modules(&self, specifier: &str, from_dir: &Path) -> Option<PathBuf> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(&pkg_name);
            if pkg_dir.is_dir() {
                let found = match &subpath {
                    Some(sub) => self.resolve_file_or_directory(&pkg_dir.join(sub)),
                    None => self.resolve_file_or_directory(&pkg_dir),
                };
                if found.is_some() {
                    return found;
                }
            }
            if dir == self.root {
                break;
            }
            current = dir.parent();
        }
        None
    }

    /// Try `target` with each extension, then as a package or directory.
    fn resolve_file_or_directory(&self, target: &Path) -> Option<PathBuf> {
        for ext in &self.extensions {
            let candidate = if ext.is_empty() {
                target.to_path_buf()
            } else {
                PathBuf::from(format!("{}{ext}", target.display()))
            };
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if !target.is_dir() {
            return None;
        }

        if let Some(entry) = package_entry(target) {
            let entry = normalize(&target.join(entry));
            if let Some(found) = self.resolve_file(&entry) {
                return Some(found);
            }
            if entry.is_dir() {
                if let Some(found) = self.resolve_index(&entry) {
                    return Some(found);
                }
            }
        }

        self.resolve_index(target)
    }

    fn resolve_file(&self, target: &Path) -> Option<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| PathBuf::from(format!("{}{ext}", target.display())))
            .find(|candidate| candidate.is_file())
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions
            .iter()
            .filter(|ext| !ext.is_empty())
            .map(|ext| dir.join(format!("index{ext}")))
            .find(|candidate| candidate.is_file())
    }
}

fn compile(pattern: &str) -> Result<Regex, BuildError> {
    Regex::new(pattern)
        .map_err(|e| BuildError::config(format!("invalid pattern '{pattern}': {e}")))
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Parse a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (String, Option<String>) {
    if specifier.starts_with('@') {
        let parts: Vec<&str> = specifier.splitn(3, '/').collect();
        if parts.len() >= 2 {
            let pkg = format!("{}/{}", parts[0], parts[1]);
            (pkg, parts.get(2).map(|s| (*s).to_string()))
        } else {
            (specifier.to_string(), None)
        }
    } else {
        match specifier.split_once('/') {
            Some((pkg, sub)) => (pkg.to_string(), Some(sub.to_string())),
            None => (specifier.to_string(), None),
        }
    }
}

/// Entry point named by a directory's `package.json` (`browser`, `module`,
/// then `main`).
fn package_entry(dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;
    ["browser", "module", "main"]
        .iter()
        .find_map(|field| json.get(field).and_then(|v| v.as_str()))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, ProcessConfig};
    use std::fs;
    use tempfile::tempdir;

    fn resolver(root: &Path) -> Resolver {
        let config = PipelineConfig::for_mode(Mode::Development, &ProcessConfig::default());
        Resolver::new(root, &config).unwrap()
    }

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash".to_string(), None));
        assert_eq!(
            parse_bare_specifier("lodash/get"),
            ("lodash".to_string(), Some("get".to_string()))
        );
        assert_eq!(parse_bare_specifier("@types/node"), ("@types/node".to_string(), None));
        assert_eq!(
            parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core".to_string(), Some("lib/parse".to_string()))
        );
    }

    #[test]
    fn test_resolve_relative_with_extension() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("index.js"), "import './App';");
        touch(&src.join("App.jsx"), "");

        let result = resolver(dir.path())
            .resolve("./App", &src.join("index.js"))
            .unwrap();
        assert_eq!(result, Resolution::File(src.join("App.jsx")));
    }

    #[test]
    fn test_resolve_directory_index() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("index.js"), "");
        touch(&src.join("components/index.js"), "");

        let result = resolver(dir.path())
            .resolve("./components", &src.join("index.js"))
            .unwrap();
        assert_eq!(result, Resolution::File(src.join("components/index.js")));
    }

    #[test]
    fn test_resolve_bare_from_src_modules() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("App.js"), "");
        touch(&src.join("assets/logo.svg"), "<svg/>");

        let result = resolver(dir.path())
            .resolve("assets/logo.svg", &src.join("App.js"))
            .unwrap();
        assert_eq!(result, Resolution::File(src.join("assets/logo.svg")));
    }

    #[test]
    fn test_resolve_package_main() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("node_modules/left-pad");
        touch(&pkg.join("package.json"), r#"{"main": "lib/pad"}"#);
        touch(&pkg.join("lib/pad.js"), "");
        touch(&dir.path().join("src/index.js"), "");

        let result = resolver(dir.path())
            .resolve("left-pad", &dir.path().join("src/index.js"))
            .unwrap();
        assert_eq!(result, Resolution::File(pkg.join("lib/pad.js")));
    }

    #[test]
    fn test_externals_and_ignore() {
        let dir = tempdir().unwrap();
        let r = resolver(dir.path());
        assert_eq!(
            r.resolve("jwplayer", &dir.path().join("src/index.js")).unwrap(),
            Resolution::External("jwplayer".to_string())
        );
        let moment = dir.path().join("node_modules/moment/moment.js");
        assert_eq!(r.resolve("./locale", &moment).unwrap(), Resolution::Ignored);
    }

    #[test]
    fn test_missing_relative_reports_attempted_path() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let err = resolver(dir.path())
            .resolve("./Missing", &src.join("App.js"))
            .unwrap_err();
        assert_eq!(err.attempted, Some(src.join("Missing")));
    }

    #[test]
    fn test_cached_resolution_is_revalidated() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("a.js"), "");
        let r = resolver(dir.path());
        assert!(r.resolve("./a", &src.join("index.js")).is_ok());

        fs::remove_file(src.join("a.js")).unwrap();
        assert!(r.resolve("./a", &src.join("index.js")).is_err());
    }
}

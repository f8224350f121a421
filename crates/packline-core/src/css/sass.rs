//! Sass/SCSS preprocessing using grass.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Extra directories searched by `@import` and `@use`.
    pub load_paths: Vec<PathBuf>,
    pub minify: bool,
    /// Absolute path of the file being compiled. Its directory is searched
    /// first and its extension selects the syntax.
    pub filename: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum SassError {
    #[error("Sass compile error: {0}")]
    Compile(String),
}

/// Compile Sass/SCSS to CSS.
///
/// `.sass` files use the indented syntax, everything else SCSS.
pub fn compile_sass(source: &str, options: &SassOptions) -> Result<String, SassError> {
    let style = if options.minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };
    let mut grass_options = grass::Options::default().style(style);

    if let Some(filename) = &options.filename {
        if is_indented(filename) {
            grass_options = grass_options.input_syntax(grass::InputSyntax::Sass);
        }
        if let Some(parent) = filename.parent() {
            grass_options = grass_options.load_path(parent);
        }
    }
    for path in &options.load_paths {
        grass_options = grass_options.load_path(path);
    }

    grass::from_string(source.to_string(), &grass_options)
        .map_err(|e| SassError::Compile(e.to_string()))
}

/// Check if a file is a Sass/SCSS file.
#[must_use]
pub fn is_sass_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("scss") || e.eq_ignore_ascii_case("sass"))
}

fn is_indented(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_basic_scss() {
        let scss = r"
            $primary: blue;
            .button {
                color: $primary;
            }
        ";
        let result = compile_sass(scss, &SassOptions::default()).unwrap();
        assert!(result.contains("color: blue"));
    }

    #[test]
    fn test_scss_nesting() {
        let scss = ".parent { .child { color: red; } }";
        let result = compile_sass(scss, &SassOptions::default()).unwrap();
        assert!(result.contains(".parent .child"));
    }

    #[test]
    fn test_indented_syntax() {
        let sass = ".box\n  width: 10px\n";
        let options = SassOptions {
            filename: Some(PathBuf::from("/tmp/theme.sass")),
            ..SassOptions::default()
        };
        let result = compile_sass(sass, &options).unwrap();
        assert!(result.contains("width: 10px"));
    }

    #[test]
    fn test_import_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("_vars.scss"), "$gap: 4px;").unwrap();
        let options = SassOptions {
            filename: Some(dir.path().join("App.scss")),
            ..SassOptions::default()
        };
        let result = compile_sass("@import 'vars';\n.a { margin: $gap; }", &options).unwrap();
        assert!(result.contains("margin: 4px"));
    }

    #[test]
    fn test_compile_error() {
        let err = compile_sass(".a { color: $undefined; }", &SassOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Sass compile error"));
    }

    #[test]
    fn test_is_sass_file() {
        assert!(is_sass_file(Path::new("styles.scss")));
        assert!(is_sass_file(Path::new("theme.sass")));
        assert!(!is_sass_file(Path::new("styles.css")));
    }
}

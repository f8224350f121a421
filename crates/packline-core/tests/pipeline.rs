//! End-to-end pipeline runs over small fixture projects.

use packline_core::bundler::BundleKind;
use packline_core::output::write_build;
use packline_core::{Build, BuildError, Mode, Pipeline, PipelineConfig, ProcessConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// `index.js` renders `App`, which imports a Sass module.
fn app_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/index.js",
        b"import App from './App';\n\
          if (process.env.NODE_ENV === \"production\") {\n\
          \x20 window.prod = true;\n\
          }\n\
          App();\n",
    );
    write(
        root,
        "src/App.js",
        b"import styles from './App.scss';\n\
          export default function App() {\n\
          \x20 return styles.title;\n\
          }\n",
    );
    write(root, "src/App.scss", b"$accent: #c00;\n.title { color: $accent; }\n");
    dir
}

fn config(mode: Mode) -> PipelineConfig {
    PipelineConfig::for_mode(mode, &ProcessConfig::default())
}

fn build(root: &Path, mode: Mode) -> Result<Build, BuildError> {
    Pipeline::new(root, config(mode))?.build()
}

fn text(build: &Build, file: &str) -> String {
    String::from_utf8(build.file(file).unwrap().to_vec()).unwrap()
}

fn is_digest_name(file: &str, prefix: &str, suffix: &str) -> bool {
    file.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .is_some_and(|hash| hash.len() == 8 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[test]
fn test_production_build_layout() {
    let project = app_project();
    let build = build(project.path(), Mode::Production).unwrap();

    let entries: Vec<_> = build
        .bundles
        .iter()
        .filter(|b| b.kind == BundleKind::Entry)
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(build.bundles.len(), 1);
    assert!(is_digest_name(&entries[0].file, "static/js/bundle.", ".js"));

    assert_eq!(build.stylesheets.len(), 1);
    let sheet = &build.stylesheets[0];
    assert!(is_digest_name(&sheet.file, "static/css/main.", ".bundle.css"));
    assert!(sheet.css.contains("title--"));
    assert!(sheet.css.contains("#c00"));

    let html = build.html_shell().unwrap();
    assert!(html.contains(&format!("./{}", entries[0].file)));
    assert!(html.contains(&format!("./{}", sheet.file)));
    assert!(html.contains("<title>Template</title>"));

    let code = text(&build, &entries[0].file);
    assert!(code.contains("window.prod=!0"), "{code}");
    assert!(!code.contains("NODE_ENV"));
    assert!(!code.contains("process.env"));
    assert!(code.is_ascii());
    assert!(build.file(&format!("{}.map", entries[0].file)).is_none());
}

#[test]
fn test_digest_names_follow_content() {
    let project = app_project();
    let first = build(project.path(), Mode::Production).unwrap();
    let again = build(project.path(), Mode::Production).unwrap();
    assert_eq!(first.bundles[0].file, again.bundles[0].file);
    assert_eq!(first.stylesheets[0].file, again.stylesheets[0].file);

    write(
        project.path(),
        "src/App.js",
        b"import styles from './App.scss';\nexport default function App() { return styles; }\n",
    );
    let changed = build(project.path(), Mode::Production).unwrap();
    assert_ne!(first.bundles[0].file, changed.bundles[0].file);
    assert_eq!(first.stylesheets[0].file, changed.stylesheets[0].file);
}

#[test]
fn test_development_build_is_stable_and_mapped() {
    let project = app_project();
    let build = build(project.path(), Mode::Development).unwrap();

    assert_eq!(build.bundles[0].file, "static/js/bundle.js");
    assert!(build.stylesheets.is_empty());
    let code = text(&build, "static/js/bundle.js");
    assert!(code.contains("__packline.style(\"src/App.scss\""));
    assert!(code.ends_with("//# sourceMappingURL=bundle.js.map\n"));

    let map: serde_json::Value =
        serde_json::from_slice(build.file("static/js/bundle.js.map").unwrap()).unwrap();
    let sources: Vec<&str> = map["sources"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s.as_str())
        .collect();
    assert!(sources.iter().any(|s| s.ends_with("/src/index.js")));

    let html = build.html_shell().unwrap();
    assert!(html.contains("http://localhost:3000/static/js/bundle.js"));
    assert!(html.contains("__packline/client.js"));
}

#[test]
fn test_missing_module_names_both_paths() {
    let project = app_project();
    write(project.path(), "src/App.js", b"import Header from './Header';\nexport default Header;\n");

    let err = build(project.path(), Mode::Production).unwrap_err();
    assert_eq!(err.code(), "UNRESOLVED_DEPENDENCY");
    match err {
        BuildError::UnresolvedDependency {
            path,
            referenced_from,
        } => {
            assert!(path.contains("Header"));
            assert_eq!(referenced_from, "src/App.js");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_missing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let err = build(dir.path(), Mode::Development).unwrap_err();
    assert_eq!(err.code(), "ENTRY_NOT_FOUND");
}

#[test]
fn test_case_collision_names_both_paths() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "src/index.js", b"import a from './Foo';\nimport b from './foo';\n");
    write(root, "src/Foo.js", b"export default 1;\n");
    write(root, "src/foo.js", b"export default 2;\n");
    // Case-insensitive filesystems keep a single file.
    if fs::read_dir(root.join("src")).unwrap().count() < 3 {
        return;
    }

    let err = build(root, Mode::Production).unwrap_err();
    assert_eq!(err.code(), "CASE_COLLISION");
    let message = err.to_string();
    assert!(message.contains("src/Foo.js"));
    assert!(message.contains("src/foo.js"));
}

#[test]
fn test_stylesheet_follows_import_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "src/index.js", b"import './second.css';\nimport './first.css';\n");
    write(root, "src/first.css", b".first { color: red; }\n");
    write(root, "src/second.css", b".second { color: blue; }\n");

    let build = build(root, Mode::Production).unwrap();
    let css = &build.stylesheets[0].css;
    let second = css.find(".second").unwrap();
    let first = css.find(".first").unwrap();
    assert!(second < first);
}

#[test]
fn test_dynamic_import_gets_an_async_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/index.js",
        b"import('./pages/About').then(function (m) { m.default(); });\n",
    );
    write(root, "src/pages/About.js", b"export default function About() {}\n");

    let build = build(root, Mode::Production).unwrap();
    let chunk = build
        .bundles
        .iter()
        .find(|b| b.kind == BundleKind::Async)
        .unwrap();
    assert_eq!(chunk.name, "About");
    assert!(is_digest_name(&chunk.file, "static/js/About.", ".chunk.js"));

    let entry = build.bundle("main").unwrap();
    assert!(entry.code.contains("__packline.load(\"src/pages/About.js\")"));
    assert!(entry.code.contains(&chunk.file));
    assert!(!build.html_shell().unwrap().contains(&chunk.file));
}

#[test]
fn test_images_inline_or_emit_by_size() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/index.js",
        b"import dot from './dot.png';\nimport photo from './photo.png';\nimport './App.scss';\n",
    );
    write(root, "src/dot.png", b"\x89PNG small");
    write(root, "src/photo.png", &vec![7u8; 20_000]);
    write(root, "src/App.scss", b".hero { background: url(./photo.png); }\n");

    let build = build(root, Mode::Production).unwrap();
    assert_eq!(build.assets.len(), 1);
    let photo = &build.assets[0].file;
    assert!(is_digest_name(photo, "static/assets/photo.", ".png"));

    let code = &build.bundle("main").unwrap().code;
    assert!(code.contains("data:image/png;base64,"));
    assert!(code.contains(&format!("__packline.p+\"{photo}\"")), "{code}");

    let css = &build.stylesheets[0].css;
    let relative = photo.replacen("static/", "../", 1);
    assert!(css.contains(&relative), "{css}");
}

#[test]
fn test_written_output_matches_file_table() {
    let project = app_project();
    let build = build(project.path(), Mode::Production).unwrap();
    let out = project.path().join("dist");

    let written = write_build(&build, &out).unwrap();
    assert_eq!(written.len(), build.files().count());
    assert!(out.join("index.html").is_file());

    let on_disk = WalkDir::new(&out)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(on_disk, written.len());
    for file in &written {
        assert_eq!(fs::metadata(out.join(&file.path)).unwrap().len(), file.size);
    }
}

//! Writing a sealed build to disk.

use crate::bundler::Build;
use crate::error::BuildError;
use packline_util::fs::{replace_dir, staging_path, write_creating_dirs};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One written file.
#[derive(Debug, Clone, Serialize)]
pub struct WrittenFile {
    pub path: String,
    pub size: u64,
}

/// Write every file of `build` under `out_dir`.
///
/// Files are staged in a sibling directory that replaces `out_dir` only
/// after the last write succeeds; on failure `out_dir` is untouched.
pub fn write_build(build: &Build, out_dir: &Path) -> Result<Vec<WrittenFile>, BuildError> {
    if !build.is_sealed() {
        return Err(BuildError::Internal("build written before sealing".into()));
    }

    let staged = staging_path(out_dir, "staging");
    if staged.exists() {
        fs::remove_dir_all(&staged).map_err(|e| BuildError::io(&staged, e))?;
    }
    fs::create_dir_all(&staged).map_err(|e| BuildError::io(&staged, e))?;

    let mut written = Vec::new();
    for (name, bytes) in build.files() {
        let path = staged.join(name);
        if let Err(e) = write_creating_dirs(&path, bytes) {
            let _ = fs::remove_dir_all(&staged);
            return Err(BuildError::io(out_dir.join(name), e));
        }
        written.push(WrittenFile {
            path: name.to_string(),
            size: bytes.len() as u64,
        });
    }

    if let Err(e) = replace_dir(&staged, out_dir) {
        let _ = fs::remove_dir_all(&staged);
        return Err(BuildError::io(out_dir, e));
    }
    debug!(dir = %out_dir.display(), files = written.len(), "build written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::build::Page;
    use crate::config::Mode;

    fn sealed(html: &str) -> Build {
        let mut build = Build::new(Mode::Production, Path::new("/project"), "./", false);
        build.pages.push(Page {
            file: "index.html".into(),
            html: html.into(),
        });
        build.seal()
    }

    #[test]
    fn test_write_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dist");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.js"), "old").unwrap();

        let written = write_build(&sealed("<html></html>"), &out).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].path, "index.html");
        assert_eq!(fs::read_to_string(out.join("index.html")).unwrap(), "<html></html>");
        assert!(!out.join("stale.js").exists());
    }

    #[test]
    fn test_unsealed_build_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let build = Build::new(Mode::Production, Path::new("/project"), "./", false);
        let err = write_build(&build, &dir.path().join("dist")).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!dir.path().join("dist").exists());
    }
}

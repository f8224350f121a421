use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components without touching the filesystem.
///
/// Letter case is preserved exactly as written.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` relative to `root` with forward slashes, or `path` itself
/// (slash-separated) when it lies outside `root`.
#[must_use]
pub fn relative_slash(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}

/// Write bytes to `path`, creating missing parent directories first.
///
/// # Errors
/// Returns an error if a directory cannot be created or the write fails.
pub fn write_creating_dirs(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Sibling path used to stage a directory before it replaces `target`.
#[must_use]
pub fn staging_path(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("out");
    let parent = target.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{name}.{tag}.{}", std::process::id()))
}

/// Replace the directory at `target` with the fully written directory `staged`.
///
/// The previous `target` (if any) is moved aside first and removed only after
/// `staged` is in place, so a failure leaves either the old or the new tree.
///
/// # Errors
/// Returns an error if either rename fails. The old tree is restored when the
/// second rename fails.
pub fn replace_dir(staged: &Path, target: &Path) -> io::Result<()> {
    let backup = staging_path(target, "old");
    let had_target = target.exists();

    if had_target {
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }
        fs::rename(target, &backup)?;
    }

    if let Err(e) = fs::rename(staged, target) {
        if had_target {
            let _ = fs::rename(&backup, target);
        }
        return Err(e);
    }

    if had_target {
        let _ = fs::remove_dir_all(&backup);
    }
    Ok(())
}

use super::Pass;
use crate::bundler::build::Build;
use crate::error::BuildError;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Fails the build when module paths depend on filesystem case folding.
///
/// Two checks: module ids that differ only by case, and ids whose spelling
/// differs in case from the entry on disk (which resolves on
/// case-insensitive filesystems only).
pub struct CaseGuardPass {
    root: PathBuf,
}

impl CaseGuardPass {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn check_disk(
        &self,
        id: &str,
        listings: &mut FxHashMap<PathBuf, Option<Vec<String>>>,
    ) -> Result<(), BuildError> {
        let mut dir = self.root.clone();
        let mut on_disk = Vec::new();
        for part in id.split('/') {
            let names = listings
                .entry(dir.clone())
                .or_insert_with(|| list_dir(&dir));
            let Some(names) = names else {
                return Ok(());
            };
            if !names.iter().any(|n| n == part) {
                match names.iter().find(|n| n.eq_ignore_ascii_case(part)) {
                    Some(actual) => {
                        on_disk.push(actual.clone());
                        let rest: Vec<&str> = id.split('/').skip(on_disk.len()).collect();
                        on_disk.extend(rest.iter().map(|s| (*s).to_string()));
                        return Err(BuildError::CaseCollision {
                            first: id.to_string(),
                            second: on_disk.join("/"),
                        });
                    }
                    None => return Ok(()),
                }
            }
            on_disk.push(part.to_string());
            dir.push(part);
        }
        Ok(())
    }
}

fn list_dir(dir: &Path) -> Option<Vec<String>> {
    let entries = fs::read_dir(dir).ok()?;
    Some(
        entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
    )
}

impl Pass for CaseGuardPass {
    fn name(&self) -> &'static str {
        "case-guard"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        let mut seen: FxHashMap<String, &str> = FxHashMap::default();
        for record in &build.modules {
            let folded = record.id.to_lowercase();
            if let Some(first) = seen.get(&folded) {
                return Err(BuildError::CaseCollision {
                    first: (*first).to_string(),
                    second: record.id.clone(),
                });
            }
            seen.insert(folded, &record.id);
        }

        let mut listings = FxHashMap::default();
        for record in &build.modules {
            if record.path.starts_with(&self.root) {
                self.check_disk(&record.id, &mut listings)?;
            }
        }
        Ok(())
    }
}

use super::Pass;
use crate::bundler::build::{Build, Stylesheet};
use crate::bundler::naming::{self, NameParts};
use crate::config::PipelineConfig;
use crate::error::BuildError;
use packline_util::hash::blake3_bytes;
use std::collections::BTreeMap;

/// Concatenates deferred stylesheet fragments into one file per bundle.
///
/// Fragments are joined in module traversal order. The pending log is kept
/// and the stylesheets are rebuilt from it on every run.
pub struct ExtractCssPass {
    disabled: bool,
    filename: String,
}

impl ExtractCssPass {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            disabled: config.extract_css.disable,
            filename: config.extract_css.filename.clone(),
        }
    }
}

impl Pass for ExtractCssPass {
    fn name(&self) -> &'static str {
        "extract-css"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        if self.disabled {
            return Ok(());
        }

        let mut per_bundle: BTreeMap<&str, Vec<(usize, &str)>> = BTreeMap::new();
        for pending in &build.pending_styles {
            per_bundle
                .entry(pending.bundle.as_str())
                .or_default()
                .push((pending.index, pending.css.as_str()));
        }

        let mut stylesheets = Vec::new();
        // Bundle order, so named chunk styles precede entry styles.
        for bundle in &build.bundles {
            let Some(fragments) = per_bundle.get_mut(bundle.name.as_str()) else {
                continue;
            };
            fragments.sort_by_key(|(index, _)| *index);
            fragments.dedup_by_key(|(index, _)| *index);

            let mut css = String::new();
            for (_, fragment) in fragments.iter() {
                css.push_str(fragment.trim_end());
                css.push('\n');
            }
            let digest = blake3_bytes(css.as_bytes());
            let file = naming::render(
                &self.filename,
                &NameParts {
                    name: &bundle.name,
                    hash: &digest,
                    ext: "css",
                },
            );
            stylesheets.push(Stylesheet {
                bundle: bundle.name.clone(),
                file,
                css,
            });
        }

        build.stylesheets = stylesheets;
        Ok(())
    }
}

//! Build assembly.
//!
//! Groups module output into bundles, names them and merges side artifacts.
//! Modules are transformed in parallel; this is the single merge point, and
//! every merge is ordered by traversal index.

use super::build::{
    Asset, AssetOrigin, Build, Bundle, BundleKind, LineOrigin, ModuleRecord, PendingStyle,
};
use super::chain::{asset_placeholder, ModuleOutput, SideArtifact};
use super::graph::ModuleGraph;
use super::naming::{self, NameParts};
use super::runtime;
use crate::config::PipelineConfig;
use crate::error::BuildError;
use packline_util::hash::{blake3_bytes, blake3_parts};
use regex_lite::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Module membership of one bundle before code generation.
struct ChunkPlan {
    name: String,
    kind: BundleKind,
    /// Traversal indices, ascending.
    modules: Vec<usize>,
    /// Entry modules evaluated at load (entries only).
    starts: Vec<usize>,
}

pub struct Assembler<'a> {
    root: &'a Path,
    config: &'a PipelineConfig,
}

impl<'a> Assembler<'a> {
    #[must_use]
    pub fn new(root: &'a Path, config: &'a PipelineConfig) -> Self {
        Self { root, config }
    }

    /// Assemble `outputs` (aligned with `graph.modules()`) into a build.
    pub fn assemble(
        &self,
        graph: &ModuleGraph,
        outputs: &[Arc<ModuleOutput>],
    ) -> Result<Build, BuildError> {
        if outputs.len() != graph.len() {
            return Err(BuildError::Internal(format!(
                "{} outputs for {} modules",
                outputs.len(),
                graph.len()
            )));
        }

        let public_path = &self.config.output.public_path;
        let mut build = Build::new(self.config.mode, self.root, public_path, self.config.sourcemap);
        let urls = AssetUrls::collect(outputs, public_path);

        build.modules = graph
            .modules()
            .iter()
            .zip(outputs)
            .map(|(module, output)| {
                let code = urls.for_script(&output.code);
                ModuleRecord {
                    id: module.id.clone(),
                    path: module.path.clone(),
                    kind: module.kind,
                    index: module.index,
                    digest: blake3_bytes(code.as_bytes()),
                    dependencies: module
                        .module_dependencies()
                        .map(|(id, _)| id.to_string())
                        .collect(),
                    hot_accepting: output.hot_accepting,
                    code: runtime::define(&module.id, &code),
                    source: Arc::clone(&module.source),
                }
            })
            .collect();

        let plans = self.plan_chunks(graph)?;
        let fingerprint = self.config.fingerprint();

        // Async chunks first: entry bundles embed their file names.
        let mut chunk_map = BTreeMap::new();
        let mut named_bundles = Vec::new();
        let mut async_bundles = Vec::new();
        let mut entry_plans = Vec::new();
        for plan in plans {
            match plan.kind {
                BundleKind::Async => {
                    let bundle = self.generate(&build, outputs, plan, None, &fingerprint);
                    if let Some(&first) = bundle.modules.first() {
                        chunk_map.insert(graph.modules()[first].id.clone(), bundle.file.clone());
                    }
                    async_bundles.push(bundle);
                }
                BundleKind::Named => {
                    named_bundles.push(self.generate(&build, outputs, plan, None, &fingerprint));
                }
                BundleKind::Entry => entry_plans.push(plan),
            }
        }
        let mut bundles = named_bundles;
        for plan in entry_plans {
            bundles.push(self.generate(&build, outputs, plan, Some(&chunk_map), &fingerprint));
        }
        bundles.extend(async_bundles);
        build.bundles = bundles;

        self.merge_artifacts(&mut build, graph, outputs, &urls);
        build.diagnostics = outputs
            .iter()
            .flat_map(|o| o.diagnostics.iter().cloned())
            .collect();

        debug!(
            bundles = build.bundles.len(),
            assets = build.assets.len(),
            styles = build.pending_styles.len(),
            "build assembled"
        );
        Ok(build)
    }

    fn plan_chunks(&self, graph: &ModuleGraph) -> Result<Vec<ChunkPlan>, BuildError> {
        let entry_sets: Vec<BTreeSet<usize>> = graph
            .entries()
            .iter()
            .map(|e| graph.static_closure(&e.modules).into_iter().collect())
            .collect();

        // Explicit named chunks take matching statically reachable modules.
        let mut named_of: FxHashMap<usize, usize> = FxHashMap::default();
        let mut plans = Vec::new();
        for chunk in &self.config.chunks {
            let test = Regex::new(&chunk.test).map_err(|e| {
                BuildError::config(format!("invalid chunk pattern '{}': {e}", chunk.test))
            })?;
            let slot = plans.len();
            let modules: Vec<usize> = entry_sets
                .iter()
                .flatten()
                .copied()
                .collect::<BTreeSet<usize>>()
                .into_iter()
                .filter(|i| !named_of.contains_key(i) && test.is_match(&graph.modules()[*i].id))
                .collect();
            for &i in &modules {
                named_of.insert(i, slot);
            }
            if !modules.is_empty() {
                plans.push(ChunkPlan {
                    name: chunk.name.clone(),
                    kind: BundleKind::Named,
                    modules,
                    starts: Vec::new(),
                });
            }
        }

        for (entry, set) in graph.entries().iter().zip(&entry_sets) {
            plans.push(ChunkPlan {
                name: entry.name.clone(),
                kind: BundleKind::Entry,
                modules: set.iter().copied().filter(|i| !named_of.contains_key(i)).collect(),
                starts: entry.modules.clone(),
            });
        }

        // Modules every entry already defines never need loading.
        let everywhere: BTreeSet<usize> = entry_sets
            .iter()
            .skip(1)
            .fold(entry_sets.first().cloned().unwrap_or_default(), |acc, s| {
                acc.intersection(s).copied().collect()
            });

        let mut targets: BTreeSet<usize> = BTreeSet::new();
        for module in graph.modules() {
            for (id, dynamic) in module.module_dependencies() {
                if let Some(index) = graph.index_of(id).filter(|_| dynamic) {
                    targets.insert(index);
                }
            }
        }

        let mut taken: FxHashSet<String> = plans.iter().map(|p| p.name.clone()).collect();
        for target in targets {
            if everywhere.contains(&target) || named_of.contains_key(&target) {
                continue;
            }
            let mut modules: Vec<usize> = graph
                .static_closure(&[target])
                .into_iter()
                .filter(|i| !everywhere.contains(i) && !named_of.contains_key(i))
                .collect();
            modules.sort_unstable();
            // The chunk map keys on the first module, which must be the target.
            modules.retain(|&i| i != target);
            modules.insert(0, target);

            let stem = chunk_stem(&graph.modules()[target].id);
            let mut name = stem.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{stem}-{n}");
                n += 1;
            }
            plans.push(ChunkPlan {
                name,
                kind: BundleKind::Async,
                modules,
                starts: Vec::new(),
            });
        }

        Ok(plans)
    }

    fn generate(
        &self,
        build: &Build,
        outputs: &[Arc<ModuleOutput>],
        plan: ChunkPlan,
        chunk_map: Option<&BTreeMap<String, String>>,
        fingerprint: &str,
    ) -> Bundle {
        let mut code = String::new();
        let mut line_map: Vec<Option<LineOrigin>> = Vec::new();
        let mut push = |text: &str, origin: &dyn Fn(usize) -> Option<LineOrigin>| {
            for (k, _) in text.split_inclusive('\n').enumerate() {
                line_map.push(origin(k));
            }
            code.push_str(text);
        };

        if plan.kind != BundleKind::Async {
            let map = chunk_map.filter(|_| plan.kind == BundleKind::Entry);
            push(&runtime::header(&build.public_path, map), &|_| None);
        }
        for &index in &plan.modules {
            let record = &build.modules[index];
            let preserving = outputs[index].line_preserving;
            let last = record.code.split_inclusive('\n').count().saturating_sub(1);
            // Line 0 is the wrapper and the last line closes it; module line
            // k sits on line k + 1.
            push(&record.code, &|k| {
                (preserving && k > 0 && k < last).then(|| LineOrigin {
                    module: index,
                    line: (k - 1) as u32,
                })
            });
        }
        for &start in &plan.starts {
            push(&runtime::start(&build.modules[start].id), &|_| None);
        }

        let digest = blake3_parts(&[code.as_bytes(), fingerprint.as_bytes()]);
        let template = match plan.kind {
            BundleKind::Entry => &self.config.output.filename,
            BundleKind::Named | BundleKind::Async => &self.config.output.chunk_filename,
        };
        let file = naming::render(
            template,
            &NameParts {
                name: &plan.name,
                hash: &digest,
                ext: "js",
            },
        );

        Bundle {
            name: plan.name,
            file,
            kind: plan.kind,
            code,
            line_map,
            column_map: Vec::new(),
            modules: plan.modules,
        }
    }

    fn merge_artifacts(
        &self,
        build: &mut Build,
        graph: &ModuleGraph,
        outputs: &[Arc<ModuleOutput>],
        urls: &AssetUrls,
    ) {
        let css_dir = self
            .config
            .extract_css
            .filename
            .rsplit_once('/')
            .map_or("", |(dir, _)| dir)
            .to_string();

        // Bundles a module's stylesheet lands in: every entry or named
        // bundle defining it, or else every entry that can load it.
        let mut homes: FxHashMap<usize, Vec<String>> = FxHashMap::default();
        for bundle in build.bundles.iter().filter(|b| b.kind != BundleKind::Async) {
            for &i in &bundle.modules {
                homes.entry(i).or_default().push(bundle.name.clone());
            }
        }
        let mut loaded: FxHashMap<usize, Vec<String>> = FxHashMap::default();
        for entry in graph.entries() {
            for i in graph.full_closure(&entry.modules) {
                if !homes.contains_key(&i) {
                    loaded.entry(i).or_default().push(entry.name.clone());
                }
            }
        }
        homes.extend(loaded);

        let mut seen_assets: FxHashSet<String> = FxHashSet::default();
        for (index, output) in outputs.iter().enumerate() {
            for artifact in &output.artifacts {
                match artifact {
                    SideArtifact::Emit { name, bytes } => {
                        if seen_assets.insert(name.clone()) {
                            build.assets.push(Asset {
                                file: name.clone(),
                                bytes: Arc::clone(bytes),
                                origin: AssetOrigin::Module,
                            });
                        }
                    }
                    SideArtifact::Stylesheet { css } => {
                        let css = urls.for_stylesheet(css, &css_dir);
                        for bundle in homes.get(&index).into_iter().flatten() {
                            build.pending_styles.push(PendingStyle {
                                bundle: bundle.clone(),
                                index,
                                module: graph.modules()[index].id.clone(),
                                css: css.clone(),
                            });
                        }
                    }
                }
            }
        }
        build.pending_styles.sort_by_key(|p| p.index);
    }
}

/// Public URLs of emitted modules, keyed by placeholder.
struct AssetUrls {
    public_path: String,
    urls: Vec<(String, String)>,
}

impl AssetUrls {
    fn collect(outputs: &[Arc<ModuleOutput>], public_path: &str) -> Self {
        let urls = outputs
            .iter()
            .filter_map(|o| {
                o.public_url
                    .as_ref()
                    .map(|url| (asset_placeholder(&o.id), url.clone()))
            })
            .collect();
        Self {
            public_path: public_path.to_string(),
            urls,
        }
    }

    fn substitute(&self, text: &str, url_for: impl Fn(&str) -> String) -> String {
        if !text.contains("__PACKLINE_ASSET_") {
            return text.to_string();
        }
        let mut out = text.to_string();
        for (placeholder, url) in &self.urls {
            if out.contains(placeholder.as_str()) {
                out = out.replace(placeholder.as_str(), &url_for(url));
            }
        }
        out
    }

    /// Script code: assets load from the public path.
    fn for_script(&self, code: &str) -> String {
        self.substitute(code, |url| {
            if url.starts_with("data:") {
                url.to_string()
            } else {
                format!("{}{url}", self.public_path)
            }
        })
    }

    /// Extracted stylesheets: assets are relative to the stylesheet.
    fn for_stylesheet(&self, css: &str, css_dir: &str) -> String {
        self.substitute(css, |url| {
            if url.starts_with("data:") {
                url.to_string()
            } else {
                relative_url(css_dir, url)
            }
        })
    }
}

/// URL of `target` as seen from a file in directory `from_dir` (both
/// relative to the output root).
fn relative_url(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count()
        .min(to.len().saturating_sub(1));
    let mut parts: Vec<&str> = std::iter::repeat("..").take(from.len() - common).collect();
    parts.extend(&to[common..]);
    parts.join("/")
}

/// Chunk name for an async target: its file stem.
fn chunk_stem(id: &str) -> String {
    let file = id.rsplit('/').next().unwrap_or(id);
    let (stem, _) = naming::stem_and_ext(file);
    if stem == "index" {
        // `pages/About/index.js` is better named after its directory.
        id.rsplit('/').nth(1).unwrap_or(stem).to_string()
    } else {
        stem.to_string()
    }
}

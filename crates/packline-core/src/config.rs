//! Pipeline description and process configuration.
//!
//! Every build starts from the mode defaults in [`PipelineConfig::for_mode`].
//! An optional `packline.json` at the project root is deep-merged on top,
//! followed by its `modes.<mode>` section:
//!
//! ```json
//! {
//!   "entry": "src/index.js",
//!   "externals": { "jwplayer": "jwplayer" },
//!   "modes": { "production": { "sourcemap": true } }
//! }
//! ```

use crate::bundler::graph::ModuleKind;
use crate::error::BuildError;
use packline_util::fs::normalize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the optional pipeline description at the project root.
pub const CONFIG_FILE: &str = "packline.json";

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown mode '{other}' (expected development or production)"
            )),
        }
    }
}

/// Settings that come from the process (flags and environment), not from the
/// pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Dev server listen host.
    pub host: String,
    /// Dev server listen port.
    pub port: u16,
    /// Upstream API host injected as `process.env.API_HOST`.
    pub api_host: String,
    /// Upstream API port injected as `process.env.API_PORT`.
    pub api_port: String,
    /// Source map toggle; `None` keeps the mode default.
    pub sourcemap: Option<bool>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            api_host: "127.0.0.1".to_string(),
            api_port: "8080".to_string(),
            sourcemap: None,
        }
    }
}

impl ProcessConfig {
    /// API host with an `http://` scheme added when none is given.
    #[must_use]
    pub fn api_origin(&self) -> String {
        let host = self.api_host.trim();
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        }
    }

    /// Absolute origin the dev server is reachable at, with trailing slash.
    #[must_use]
    pub fn public_origin(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Full pipeline description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub mode: Mode,
    /// Entry name to root-relative entry paths.
    pub entry: BTreeMap<String, Vec<String>>,
    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub chunks: Vec<ChunkConfig>,
    /// Request to global variable name.
    #[serde(default)]
    pub externals: BTreeMap<String, String>,
    #[serde(default)]
    pub ignore: Vec<IgnoreConfig>,
    /// Expression to replacement literal, e.g. `process.env.NODE_ENV` to `"production"`.
    #[serde(default)]
    pub define: BTreeMap<String, String>,
    pub extract_css: ExtractCssConfig,
    pub pages: Vec<PageConfig>,
    pub minify: MinifyConfig,
    pub icons: IconsConfig,
    pub sourcemap: bool,
    #[serde(default)]
    pub advisory_fatal: bool,
    /// Live-reload client script injected into pages.
    #[serde(default)]
    pub dev_client: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub path: PathBuf,
    pub filename: String,
    pub chunk_filename: String,
    pub public_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConfig {
    /// Directories searched for bare specifiers, relative to the root.
    pub modules: Vec<String>,
    pub extensions: Vec<String>,
}

/// Enforcement stage of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforce {
    Pre,
}

/// One rule of the pipeline description.
///
/// A rule either binds a chain (`use`) or groups alternatives (`oneOf`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce: Option<Enforce>,
    #[serde(default)]
    pub advisory: bool,
    #[serde(default, rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<RuleConfig>,
}

/// A named step with its options, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepSpecRepr")]
pub struct StepSpec {
    pub step: String,
    pub options: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepSpecRepr {
    Name(String),
    Full {
        step: String,
        #[serde(default)]
        options: Value,
    },
}

impl From<StepSpecRepr> for StepSpec {
    fn from(repr: StepSpecRepr) -> Self {
        match repr {
            StepSpecRepr::Name(step) => Self {
                step,
                options: Value::Null,
            },
            StepSpecRepr::Full { step, options } => Self { step, options },
        }
    }
}

impl StepSpec {
    #[must_use]
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            options: Value::Null,
        }
    }

    #[must_use]
    pub fn with_options(step: &str, options: Value) -> Self {
        Self {
            step: step.to_string(),
            options,
        }
    }
}

/// Explicit named chunk: modules whose id matches `test` move into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub name: String,
    pub test: String,
}

/// Requests matching `request` issued from modules matching `context`
/// resolve to an empty module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    pub request: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractCssConfig {
    /// Keep styles in script bundles as injected `<style>` elements.
    pub disable: bool,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub filename: String,
    /// Root-relative template; the built-in template is used when absent.
    #[serde(default)]
    pub template: Option<String>,
    pub title: String,
    /// Bundles to reference; all entry and named bundles when `None`.
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinifyConfig {
    pub enabled: bool,
    /// Rewrite negated relational comparisons. Unsafe for NaN operands.
    pub comparisons: bool,
    /// Escape every non-ASCII character in script output.
    pub ascii_only: bool,
    /// Minify generated HTML pages.
    pub html: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconsConfig {
    pub enabled: bool,
    /// Root-relative source image.
    pub logo: String,
    /// Output directory template; `[hash]` is the logo digest.
    pub prefix: String,
    /// Fail the build when the logo is missing.
    #[serde(default)]
    pub required: bool,
    pub app_name: String,
    pub background: String,
}

impl PipelineConfig {
    /// Defaults for `mode`.
    #[must_use]
    pub fn for_mode(mode: Mode, process: &ProcessConfig) -> Self {
        let prod = mode.is_production();

        let mut define = BTreeMap::new();
        define.insert(
            "process.env.NODE_ENV".to_string(),
            json_literal(mode.as_str()),
        );
        if !prod {
            define.insert(
                "process.env.API_HOST".to_string(),
                json_literal(&process.api_origin()),
            );
            define.insert(
                "process.env.API_PORT".to_string(),
                json_literal(&process.api_port),
            );
        }

        let output = if prod {
            OutputConfig {
                path: PathBuf::from("dist"),
                filename: "static/js/bundle.[chunkhash:8].js".to_string(),
                chunk_filename: "static/js/[name].[chunkhash:8].chunk.js".to_string(),
                public_path: "./".to_string(),
            }
        } else {
            OutputConfig {
                path: PathBuf::from("dist"),
                filename: "static/js/bundle.js".to_string(),
                chunk_filename: "static/js/[name].chunk.js".to_string(),
                public_path: process.public_origin(),
            }
        };

        let dev_client = (!prod).then(|| format!("{}__packline/client.js", output.public_path));

        let mut entry = BTreeMap::new();
        entry.insert("main".to_string(), vec!["src/index.js".to_string()]);

        let mut externals = BTreeMap::new();
        externals.insert("jwplayer".to_string(), "jwplayer".to_string());

        Self {
            mode,
            entry,
            output,
            resolve: ResolveConfig {
                modules: vec!["src".to_string(), "node_modules".to_string()],
                extensions: vec![String::new(), ".js".to_string(), ".jsx".to_string()],
            },
            rules: default_rules(mode),
            chunks: Vec::new(),
            externals,
            ignore: vec![IgnoreConfig {
                request: r"^\./locale$".to_string(),
                context: "moment$".to_string(),
            }],
            define,
            extract_css: ExtractCssConfig {
                disable: !prod,
                filename: "static/css/[name].[contenthash:8].bundle.css".to_string(),
            },
            pages: vec![PageConfig {
                filename: "index.html".to_string(),
                template: Some("config/index.template.html".to_string()),
                title: "Template".to_string(),
                chunks: None,
            }],
            minify: MinifyConfig {
                enabled: prod,
                comparisons: false,
                ascii_only: true,
                html: prod,
            },
            icons: IconsConfig {
                enabled: prod,
                logo: "src/assets/favicon.png".to_string(),
                prefix: "static/assets/icons-[hash]/".to_string(),
                required: false,
                app_name: "Template".to_string(),
                background: "#fff".to_string(),
            },
            sourcemap: process.sourcemap.unwrap_or(!prod),
            advisory_fatal: false,
            dev_client,
        }
    }

    /// Load the pipeline description for `root`.
    ///
    /// `explicit` names a description file that must exist; otherwise
    /// `packline.json` is used when present.
    pub fn load(
        root: &Path,
        mode: Mode,
        process: &ProcessConfig,
        explicit: Option<&Path>,
    ) -> Result<Self, BuildError> {
        let path = match explicit {
            Some(p) => {
                let abs = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                };
                if !abs.exists() {
                    return Err(BuildError::config(format!(
                        "config file not found: {}",
                        abs.display()
                    )));
                }
                Some(abs)
            }
            None => Some(root.join(CONFIG_FILE)).filter(|p| p.exists()),
        };

        let overrides = match path {
            Some(path) => {
                let source =
                    std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
                serde_json::from_str(&source).map_err(|e| {
                    BuildError::config(format!("failed to parse {}: {e}", path.display()))
                })?
            }
            None => Value::Null,
        };

        Self::from_overrides(mode, process, overrides)
    }

    /// Apply a JSON override object on top of the mode defaults.
    pub fn from_overrides(
        mode: Mode,
        process: &ProcessConfig,
        overrides: Value,
    ) -> Result<Self, BuildError> {
        let defaults = Self::for_mode(mode, process);
        let mut merged = serde_json::to_value(&defaults)
            .map_err(|e| BuildError::config(format!("failed to encode defaults: {e}")))?;

        if let Value::Object(mut map) = overrides {
            let per_mode = map
                .remove("modes")
                .and_then(|mut modes| modes.get_mut(mode.as_str()).map(Value::take));
            map.remove("mode");

            let mut base = Value::Object(map);
            normalize_entry(&mut base);
            merge(&mut merged, base);

            if let Some(mut section) = per_mode {
                normalize_entry(&mut section);
                merge(&mut merged, section);
            }
        } else if !overrides.is_null() {
            return Err(BuildError::config(
                "pipeline description must be a JSON object",
            ));
        }

        let mut config: Self = serde_json::from_value(merged)
            .map_err(|e| BuildError::config(format!("invalid pipeline description: {e}")))?;
        config.mode = mode;
        if let Some(sourcemap) = process.sourcemap {
            config.sourcemap = sourcemap;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.entry.is_empty() || self.entry.values().any(Vec::is_empty) {
            return Err(BuildError::config("at least one entry point is required"));
        }
        if self.entry.len() > 1 && !self.output.filename.contains("[name]") {
            return Err(BuildError::config(format!(
                "{} entries share the output filename '{}'; add [name] to it",
                self.entry.len(),
                self.output.filename
            )));
        }
        if self.pages.iter().any(|p| p.filename.is_empty()) {
            return Err(BuildError::config("page filename must not be empty"));
        }
        if self.output.path.as_os_str().is_empty() {
            return Err(BuildError::config("output path must not be empty"));
        }
        Ok(())
    }

    /// Reject an output directory whose replacement would delete the
    /// project root or a source directory (`resolve.modules` or the
    /// directory of an entry). Relative paths are taken from `root`.
    pub fn check_output_dir(&self, root: &Path, out_dir: &Path) -> Result<(), BuildError> {
        if out_dir.as_os_str().is_empty() {
            return Err(BuildError::config("output directory must not be empty"));
        }
        let root = normalize(root);
        let out = normalize(&root.join(out_dir));
        if root.starts_with(&out) {
            return Err(BuildError::config(format!(
                "output directory '{}' would replace the project root",
                out_dir.display()
            )));
        }

        let entry_dirs = self
            .entry
            .values()
            .flatten()
            .filter_map(|entry| Path::new(entry).parent().map(Path::to_path_buf));
        let sources = self.resolve.modules.iter().map(PathBuf::from).chain(entry_dirs);
        for dir in sources {
            let dir = normalize(&root.join(dir));
            if dir == root {
                continue;
            }
            if out.starts_with(&dir) || dir.starts_with(&out) {
                return Err(BuildError::config(format!(
                    "output directory '{}' overlaps source directory '{}'",
                    out_dir.display(),
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Digest of the settings that change generated code without changing
    /// module sources.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<&[u8]> = vec![self.mode.as_str().as_bytes()];
        for (key, value) in &self.define {
            parts.push(key.as_bytes());
            parts.push(value.as_bytes());
        }
        parts.push(self.output.public_path.as_bytes());
        packline_util::hash::blake3_parts(&parts)
    }
}

/// Encode `value` as a JSON string literal.
fn json_literal(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn step_with(step: &str, options: Value) -> StepSpec {
    StepSpec::with_options(step, options)
}

fn rule(test: &str, steps: Vec<StepSpec>) -> RuleConfig {
    RuleConfig {
        test: Some(test.to_string()),
        steps,
        ..Default::default()
    }
}

/// Default rule set, mirroring a typical React application layout.
fn default_rules(mode: Mode) -> Vec<RuleConfig> {
    let prod = mode.is_production();
    let local_ident = if prod {
        "[local]--[hash]"
    } else {
        "[name]__[local]--[hash]"
    };
    let asset_name = "static/assets/[name].[hash:8].[ext]";
    let postcss = step_with("postcss", json!({ "autoprefix": true, "minimize": prod }));

    let lint = RuleConfig {
        include: vec!["src".to_string()],
        enforce: Some(Enforce::Pre),
        advisory: true,
        ..rule(r"\.(js|jsx)$", vec![StepSpec::new("lint")])
    };
    let stylelint = RuleConfig {
        include: vec!["src".to_string()],
        enforce: Some(Enforce::Pre),
        advisory: true,
        ..rule(r"\.s?(a|c)ss$", vec![StepSpec::new("stylelint")])
    };

    let one_of = vec![
        RuleConfig {
            include: vec!["src".to_string()],
            exclude: vec!["node_modules".to_string()],
            ..rule(r"\.(js|jsx)$", vec![StepSpec::new("script")])
        },
        RuleConfig {
            include: vec!["node_modules".to_string()],
            ..rule(r"\.(js|mjs|cjs)$", vec![StepSpec::new("script")])
        },
        rule(r"\.json$", vec![StepSpec::new("json")]),
        rule(
            r"\.css$",
            vec![
                step_with("css", json!({ "importLoaders": 1 })),
                postcss.clone(),
                StepSpec::new("extract"),
            ],
        ),
        rule(
            r"\.s(a|c)ss$",
            vec![
                StepSpec::new("sass"),
                step_with(
                    "css",
                    json!({ "modules": true, "localIdentName": local_ident }),
                ),
                postcss,
                StepSpec::new("extract"),
            ],
        ),
        rule(
            r"\.(bmp|gif|jpe?g|png)$",
            vec![step_with(
                "url",
                json!({ "limit": 10000, "name": asset_name }),
            )],
        ),
        RuleConfig {
            exclude: vec![
                r"\.(js|jsx|mjs)$".to_string(),
                r"\.html$".to_string(),
                r"\.json$".to_string(),
            ],
            steps: vec![step_with("file", json!({ "name": asset_name }))],
            ..Default::default()
        },
    ];

    vec![
        lint,
        stylelint,
        RuleConfig {
            one_of,
            ..Default::default()
        },
    ]
}

/// Accept `"entry": "a.js"`, `["a.js"]` or `{ "name": "a.js" | [...] }`.
fn normalize_entry(value: &mut Value) {
    let Some(entry) = value.get_mut("entry") else {
        return;
    };
    let normalized = match entry.take() {
        Value::String(s) => json!({ "main": [s] }),
        Value::Array(items) => json!({ "main": items }),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(name, v)| match v {
                    Value::String(s) => (name, json!([s])),
                    other => (name, other),
                })
                .collect(),
        ),
        other => other,
    };
    *entry = normalized;
}

/// Deep-merge `overlay` into `base`: objects merge key by key, anything
/// else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) if key != "entry" => merge(slot, value),
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

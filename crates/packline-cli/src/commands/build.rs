//! `packline build` command implementation.

use miette::{miette, Result};
use packline_core::output::{write_build, WrittenFile};
use packline_core::{BuildError, Diagnostic, Mode, Pipeline, PipelineConfig, ProcessConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    pub mode: Mode,
    /// Explicit pipeline description file.
    pub config: Option<PathBuf>,
    /// Output directory override.
    pub out: Option<PathBuf>,
    pub process: ProcessConfig,
}

/// Successful build, as printed by `--json`.
#[derive(Serialize)]
struct BuildResultJson {
    ok: bool,
    mode: Mode,
    out_dir: String,
    duration_ms: u64,
    files: Vec<WrittenFile>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct BuildErrorJson {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

/// Failed build, as printed by `--json`.
#[derive(Serialize)]
struct BuildErrorResult {
    ok: bool,
    error: BuildErrorJson,
}

struct Summary {
    out_dir: PathBuf,
    files: Vec<WrittenFile>,
    diagnostics: Vec<Diagnostic>,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let started = Instant::now();
    match execute(&action) {
        Ok(summary) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            if json {
                let result = BuildResultJson {
                    ok: true,
                    mode: action.mode,
                    out_dir: summary.out_dir.display().to_string(),
                    duration_ms,
                    files: summary.files,
                    diagnostics: summary.diagnostics,
                };
                print_json(&result);
            } else {
                print_human(&summary, duration_ms);
            }
            Ok(())
        }
        Err(e) if json => {
            let result = BuildErrorResult {
                ok: false,
                error: BuildErrorJson {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    path: e.path(),
                },
            };
            print_json(&result);
            std::process::exit(1);
        }
        Err(e) => Err(miette!(code = e.code(), "{e}")),
    }
}

fn execute(action: &BuildAction) -> Result<Summary, BuildError> {
    let config = PipelineConfig::load(
        &action.cwd,
        action.mode,
        &action.process,
        action.config.as_deref(),
    )?;
    let pipeline = Pipeline::new(&action.cwd, config)?;
    let build = pipeline.build()?;

    let out_dir = output_dir(pipeline.root(), pipeline.config(), action.out.as_deref())?;
    let files = write_build(&build, &out_dir)?;
    info!(dir = %out_dir.display(), files = files.len(), "output written");

    Ok(Summary {
        out_dir,
        files,
        diagnostics: build.diagnostics,
    })
}

/// `--out` wins over `output.path`; relative paths are taken from the
/// project root. Directories overlapping the root or sources are refused.
fn output_dir(
    root: &Path,
    config: &PipelineConfig,
    flag: Option<&Path>,
) -> Result<PathBuf, BuildError> {
    let dir = flag.unwrap_or(config.output.path.as_path());
    config.check_output_dir(root, dir)?;
    Ok(if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        root.join(dir)
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error: cannot encode result: {e}"),
    }
}

fn print_human(summary: &Summary, duration_ms: u64) {
    for diagnostic in &summary.diagnostics {
        eprintln!(
            "  warning: {} [{}] {}",
            diagnostic.module, diagnostic.step, diagnostic.message
        );
    }
    println!();
    println!("  Compiled successfully in {duration_ms}ms.");
    println!();
    let width = summary.files.iter().map(|f| format_size(f.size).len()).max().unwrap_or(0);
    for file in &summary.files {
        println!("  {:>width$}  {}", format_size(file.size), file.path);
    }
    println!();
    println!("  Output written to {}", summary.out_dir.display());
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::for_mode(Mode::Production, &ProcessConfig::default())
    }

    #[test]
    fn test_output_dir_resolution() {
        let root = Path::new("/project");
        let config = config();
        assert_eq!(
            output_dir(root, &config, None).unwrap(),
            PathBuf::from("/project/dist")
        );
        assert_eq!(
            output_dir(root, &config, Some(Path::new("/tmp/out"))).unwrap(),
            PathBuf::from("/tmp/out")
        );
        assert_eq!(
            output_dir(root, &config, Some(Path::new("public"))).unwrap(),
            PathBuf::from("/project/public")
        );
    }

    #[test]
    fn test_output_dir_refuses_root_and_sources() {
        let root = Path::new("/project");
        let config = config();
        for flag in [".", "", "/project", "/", "src", "src/out"] {
            let err = output_dir(root, &config, Some(Path::new(flag))).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR", "{flag:?}");
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
    }
}

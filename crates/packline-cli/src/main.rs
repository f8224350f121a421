#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use packline_core::{Mode, ProcessConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packline")]
#[command(author, version, about = "Front-end build pipeline and dev server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the project root
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the project into the output directory
    Build {
        /// Build mode
        #[arg(long, default_value = "production")]
        mode: Mode,

        /// Pipeline description file (default: packline.json when present)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output directory (overrides output.path)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        #[command(flatten)]
        process: ProcessArgs,
    },

    /// Serve the project with live reload
    Dev {
        /// Build mode
        #[arg(long, default_value = "development")]
        mode: Mode,

        /// Pipeline description file (default: packline.json when present)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[command(flatten)]
        process: ProcessArgs,
    },
}

/// Flags that also come from the environment.
#[derive(clap::Args, Debug, Clone)]
struct ProcessArgs {
    /// Dev server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Dev server port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Upstream API host, exposed as process.env.API_HOST
    #[arg(long, env = "PACKLINE_API_HOST", default_value = "127.0.0.1")]
    api_host: String,

    /// Upstream API port, exposed as process.env.API_PORT
    #[arg(long, env = "PACKLINE_API_PORT", default_value = "8080")]
    api_port: String,

    /// Emit source maps (always on in development)
    #[arg(
        long,
        env = "GENERATE_SOURCEMAP",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    sourcemap: Option<bool>,
}

impl From<ProcessArgs> for ProcessConfig {
    fn from(args: ProcessArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            api_host: args.api_host,
            api_port: args.api_port,
            sourcemap: args.sourcemap,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Build {
            mode,
            config,
            out,
            process,
        } => {
            let action = commands::build::BuildAction {
                cwd,
                mode,
                config,
                out,
                process: process.into(),
            };
            commands::build::run(action, cli.json)
        }
        Commands::Dev {
            mode,
            config,
            process,
        } => {
            let action = commands::dev::DevAction {
                cwd,
                mode,
                config,
                process: process.into(),
            };
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(commands::dev::run(action))
        }
    }
}

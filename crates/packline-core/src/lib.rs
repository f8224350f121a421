#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Front-end build pipeline and development session.
//!
//! A [`bundler::Pipeline`] turns a tree of scripts, styles and images into
//! a [`bundler::Build`]: rules pick a transformation chain per module, chains
//! run in parallel, the assembler groups module output into named bundles and
//! the plugin orchestrator finishes the build with ordered passes.
//!
//! The [`dev`] module wraps a pipeline in a long-lived session that publishes
//! builds atomically and classifies rebuilds into hot updates or reloads.

pub mod bundler;
pub mod config;
pub mod css;
pub mod dev;
pub mod error;
pub mod imports;
pub mod js;
pub mod output;

pub use bundler::{Build, Pipeline};
pub use config::{Mode, PipelineConfig, ProcessConfig};
pub use error::{BuildError, Diagnostic};
pub use imports::{scan_imports, ImportKind, ImportSpecCore};

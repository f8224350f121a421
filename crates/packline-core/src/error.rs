use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal build error.
///
/// Any of these aborts the current build. In a dev session the previously
/// published build stays live; a one-shot production build writes nothing.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot resolve '{path}' (referenced from {referenced_from})")]
    UnresolvedDependency {
        path: String,
        referenced_from: String,
    },

    #[error("no rule matches module {path}")]
    UnresolvedModuleType { path: String },

    #[error("step '{step}' failed for {module}: {message}")]
    TransformStepFailure {
        module: String,
        step: String,
        message: String,
    },

    #[error("module paths differ only by case: {first} and {second}")]
    CaseCollision { first: String, second: String },

    #[error("advisory step '{step}' reported {} finding(s) in {module}", .findings.len())]
    AdvisoryStepFailure {
        module: String,
        step: String,
        findings: Vec<String>,
    },

    #[error("entry point not found: {path}")]
    EntryNotFound { path: String },

    #[error("pass '{pass}' failed: {message}")]
    PassFailure { pass: &'static str, message: String },

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedDependency { .. } => "UNRESOLVED_DEPENDENCY",
            Self::UnresolvedModuleType { .. } => "UNRESOLVED_MODULE_TYPE",
            Self::TransformStepFailure { .. } => "TRANSFORM_STEP_FAILURE",
            Self::CaseCollision { .. } => "CASE_COLLISION",
            Self::AdvisoryStepFailure { .. } => "ADVISORY_STEP_FAILURE",
            Self::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            Self::PassFailure { .. } => "PASS_FAILURE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Module or file the error points at, if any.
    #[must_use]
    pub fn path(&self) -> Option<String> {
        match self {
            Self::UnresolvedDependency {
                referenced_from, ..
            } => Some(referenced_from.clone()),
            Self::UnresolvedModuleType { path } | Self::EntryNotFound { path } => {
                Some(path.clone())
            }
            Self::TransformStepFailure { module, .. }
            | Self::AdvisoryStepFailure { module, .. } => Some(module.clone()),
            Self::CaseCollision { first, .. } => Some(first.clone()),
            Self::Io { path, .. } => Some(path.display().to_string()),
            Self::PassFailure { .. } | Self::Config(_) | Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Non-fatal finding reported by an advisory step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Module id the finding belongs to.
    pub module: String,
    /// Step that produced it.
    pub step: String,
    pub message: String,
}

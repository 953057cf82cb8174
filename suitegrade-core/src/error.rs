//! Error taxonomy and per-run diagnostics
//!
//! Global invariants enforced:
//! - No error aborts a batch; a bad unit only removes its own contribution
//! - Every skipped unit leaves a diagnostic behind

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A source unit could not be read or decoded.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

impl InputError {
    pub fn path(&self) -> &PathBuf {
        match self {
            InputError::Unreadable { path, .. } | InputError::NotUtf8 { path } => path,
        }
    }
}

/// The external compiler / test runner failed to produce a usable result.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("toolchain command is empty")]
    EmptyCommand,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("toolchain timed out after {0:?}")]
    TimedOut(Duration),
    #[error("toolchain I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage a diagnostic was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStage {
    Input,
    Classification,
    Toolchain,
}

/// Non-fatal problem recorded while producing a report
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: DiagnosticStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn input(err: &InputError) -> Self {
        Diagnostic {
            stage: DiagnosticStage::Input,
            file: Some(err.path().to_string_lossy().to_string()),
            message: err.to_string(),
        }
    }

    pub fn toolchain(err: &ToolchainError) -> Self {
        Diagnostic {
            stage: DiagnosticStage::Toolchain,
            file: None,
            message: err.to_string(),
        }
    }

    pub fn ambiguous(file: &str) -> Self {
        Diagnostic {
            stage: DiagnosticStage::Classification,
            file: Some(file.to_string()),
            message: "no domain category met the hit threshold; defaulted to utility".to_string(),
        }
    }
}

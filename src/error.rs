//! Structured error handling and exit codes.

use serde::Serialize;

/// Exit codes for trackdedup.
///
/// - 0: the run completed, including when the coverage gate blocked it
/// - 1: setup failure (bad configuration, catalog unreachable, snapshot unreadable)
/// - 130: interrupted by the user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// The run completed.
    Success = 0,
    /// Nothing could be operated on.
    SetupFailure = 1,
    /// The run stopped at a Ctrl+C.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "TD000",
            Self::SetupFailure => "TD001",
            Self::Interrupted => "TD130",
        }
    }
}

/// Fatal error as printed by `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code prefix (e.g. "TD001")
    pub code: String,
    /// Process exit code
    pub exit_code: i32,
    /// Message including the context chain
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Build from an anyhow error and the exit code it maps to.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

//! Result classification: turn a raw [`ExecutionResult`] into a judged
//! verdict against the expected output.

use serde::{Deserialize, Serialize};

use crate::types::ExecutionResult;

/// Judged outcome of one case. Derived from the raw result on demand,
/// never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Success,
    CompileError,
    SyntaxError,
    RuntimeException,
    WrongOutput,
    Timeout,
    Failure,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerdictStatus::Success => "success",
            VerdictStatus::CompileError => "compile_error",
            VerdictStatus::SyntaxError => "syntax_error",
            VerdictStatus::RuntimeException => "runtime_exception",
            VerdictStatus::WrongOutput => "wrong_output",
            VerdictStatus::Timeout => "timeout",
            VerdictStatus::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Substrings scanned for in stderr to recognize syntax errors and
/// runtime tracebacks. Substring matching drifts across interpreter
/// versions, so the markers are data, not logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictMarkers {
    pub syntax: Vec<String>,
    pub traceback: Vec<String>,
}

impl Default for VerdictMarkers {
    fn default() -> Self {
        VerdictMarkers {
            syntax: vec!["SyntaxError".to_string()],
            traceback: vec!["Traceback (most recent call last)".to_string()],
        }
    }
}

impl VerdictMarkers {
    fn matches_syntax(&self, stderr: &str) -> bool {
        self.syntax.iter().any(|m| stderr.contains(m.as_str()))
    }

    fn matches_traceback(&self, stderr: &str) -> bool {
        self.traceback.iter().any(|m| stderr.contains(m.as_str()))
    }
}

/// Classify one raw result. Pure function; the priority order below is
/// fixed and earlier rules always win (a timed-out run with a nonzero
/// exit is a `timeout`, never a `runtime_exception`).
///
/// With no expected output, a clean run (exit 0, empty stderr) counts
/// as `success` rather than `wrong_output`.
pub fn classify(
    result: &ExecutionResult,
    expected: Option<&str>,
    markers: &VerdictMarkers,
) -> VerdictStatus {
    if result.exit_code == -1 && !result.stderr.is_empty() {
        return VerdictStatus::CompileError;
    }
    if result.timed_out {
        return VerdictStatus::Timeout;
    }
    if markers.matches_syntax(&result.stderr) {
        return VerdictStatus::SyntaxError;
    }
    if result.exit_code != 0 {
        return VerdictStatus::RuntimeException;
    }
    if result.stderr.is_empty() {
        let matched = match expected {
            Some(expected) => result.stdout.trim() == expected.trim(),
            None => true,
        };
        return if matched {
            VerdictStatus::Success
        } else {
            VerdictStatus::WrongOutput
        };
    }
    if markers.matches_traceback(&result.stderr) {
        return VerdictStatus::RuntimeException;
    }
    VerdictStatus::Failure
}

//! Error types for shader loading, pipeline documents and GPU setup.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix used for every diagnostic line attached to a node.
pub const DIAG_PREFIX: &str = "(filterstack)";

/// A failure that leaves a node without any usable pass, or truncates its
/// pass list at `pass`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read input file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader requires version {required}, but only {supported} is supported")]
    UnsupportedVersion { required: f32, supported: f32 },

    #[error("no valid 'run' or 'run_pass1' function found")]
    NoEntryPoint,

    #[error("pass {pass} failed to compile:\n{log}")]
    Compile { pass: usize, log: String },
}

/// A pipeline document that was rejected as a whole.
#[derive(Debug, Error, PartialEq)]
pub enum DocumentError {
    #[error("pipeline document is empty")]
    Empty,

    #[error("pipeline document does not start with a [{expected}] section")]
    MissingHeader { expected: &'static str },

    #[error("unsupported pipeline document version")]
    UnsupportedVersion,

    #[error("syntax error in line {line}: '{text}'")]
    Syntax { line: usize, text: String },
}

/// GPU backend setup failures.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("vertex stage failed to compile: {0}")]
    VertexStage(String),

    #[error("GPU unavailable: {0}")]
    Unavailable(String),
}

/// Accumulates human-readable diagnostics for a node, one line per entry.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    text: String,
}

impl Diagnostics {
    /// Appends a prefixed diagnostic line.
    pub fn push(&mut self, msg: impl std::fmt::Display) {
        self.text.push_str(&format!("{DIAG_PREFIX} {msg}\n"));
    }

    /// Appends compiler output verbatim.
    pub fn push_log(&mut self, log: &str) {
        let log = log.trim_end();
        if !log.is_empty() {
            self.text.push_str(log);
            self.text.push('\n');
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_prefix_each_line() {
        let mut diag = Diagnostics::default();
        diag.push("unrecognized token '@foo'");
        diag.push(LoadError::NoEntryPoint);
        assert_eq!(
            diag.as_str(),
            "(filterstack) unrecognized token '@foo'\n(filterstack) no valid 'run' or 'run_pass1' function found\n"
        );
    }

    #[test]
    fn test_compile_log_is_kept_verbatim() {
        let mut diag = Diagnostics::default();
        diag.push_log("0:3(1): warning: unused\n\n");
        diag.push_log("   ");
        assert_eq!(diag.into_string(), "0:3(1): warning: unused\n");
    }
}

// Error types shared across the crate.
//
// Two broad families: artifact problems (parse errors, structural
// corruption) and external stage problems (non-zero exit, signal,
// missing resume state). Non-compatible sites are *not* errors; they
// are the validator's output and live in `compat::CompatReport`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum ArgError {
    /// Underlying I/O failure (open, read, create directory).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A sites or SMC file failed to parse.
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    /// An artifact parsed but violates a structural precondition
    /// (block coverage gaps/overlaps, column arity, name mismatch).
    #[error("malformed artifact: {0}")]
    Malformed(String),

    /// An external stage exited with a non-zero code. Fatal, no retry.
    #[error("stage '{stage}' failed with exit code {code}: {command}")]
    StageFailed {
        stage: String,
        code: i32,
        command: String,
    },

    /// An external stage was terminated by a signal. Fatal, no retry.
    #[error("stage '{stage}' was terminated by a signal: {command}")]
    StageSignaled { stage: String, command: String },

    /// An external stage could not be launched at all.
    #[error("stage '{stage}' could not be launched: {source}")]
    StageSpawn {
        stage: String,
        #[source]
        source: io::Error,
    },

    /// A resume run was requested but the prior output directory is gone.
    #[error("cannot resume: prior output directory {} does not exist", .0.display())]
    ResumeMissing(PathBuf),
}

impl ArgError {
    /// Parse error with file and line context.
    pub fn parse(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Structural precondition failure.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArgError>;

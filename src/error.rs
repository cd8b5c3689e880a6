//! src/error.rs
//! Error type shared by every pipeline stage, and the mapping to process exit codes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Exit status used when the user interrupts the run.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported architecture '{0}' (expected x86_64 or aarch64)")]
    UnsupportedArch(String),

    #[error("missing required tools: {}\n  install them with: {remedy}", missing.join(", "))]
    MissingTools { missing: Vec<String>, remedy: String },

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} failed with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("could not start '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' failed ({})", exit_description(*code))]
    CommandFailed { program: String, code: Option<i32> },

    #[error("bundling helper failed ({}):\n{output}", exit_description(*code))]
    BundlerFailed { code: Option<i32>, output: String },

    #[error("no SVG converter found (tried {})", tried.join(", "))]
    NoIconConverter { tried: Vec<String> },

    #[error("AppDir {} is incomplete: {reason}", path.display())]
    InvalidAppDir { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => EXIT_INTERRUPTED,
            _ => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by signal".to_string(),
    }
}

/// Attaches a path to `io::Error`s.
pub trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}

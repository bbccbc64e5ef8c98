use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Fatal configuration errors. Anything here aborts the run before or during
/// startup; silently reusing seeds or parameter rows would bias the output
/// statistics, so undersized input files are never recoverable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is too short for {needed} replicates (found {found} rows)")]
    TooShort {
        path: PathBuf,
        needed: usize,
        found: usize,
    },

    #[error("{path}:{line}: cannot parse {what} from {value:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        what: &'static str,
        value: String,
    },

    #[error("invalid scenario {name}: {message}")]
    Scenario { name: String, message: String },

    #[error("cannot write output file: {0}")]
    OutputWrite(#[from] csv::Error),
}

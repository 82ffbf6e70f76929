//! Configuration-time error kinds.
//!
//! Runtime scan failures are data (`InvocationFailure`), not errors of this
//! type: they flow through the pipeline into the emitted result.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown scan mode: {0}")]
    UnknownScanMode(String),

    #[error("unknown output format: {0}")]
    UnknownOutputFormat(String),

    #[error("invalid unreachable pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

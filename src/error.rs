use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open {path} for reading")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Syntax error in line {line} of {path}")]
    Syntax { path: String, line: usize },
    #[error("Duplicate parameter {name} in {path}")]
    Duplicate { path: String, name: String },
    #[error("Configuration parameter {0} is undefined")]
    Undefined(String),
    #[error("Configuration parameter {0} value is invalid")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to open trace {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {line}: trace_next: {msg}")]
    Syntax {
        path: String,
        line: usize,
        msg: &'static str,
    },
    #[error("Failed to read trace")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("Invalid arguments")]
    Arguments,
    #[error("Failed to write output")]
    Io(#[from] io::Error),
    #[error("Failed to write statistics")]
    Json(#[from] serde_json::Error),
}

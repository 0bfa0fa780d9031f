use std::path::PathBuf;

use thiserror::Error;

/// Problems with the supplied configuration. Detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target URL must start with http:// or https://: {0}")]
    InvalidScheme(String),
    #[error("invalid target URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported request method: {0} (expected GET, POST, PUT or DELETE)")]
    UnsupportedMethod(String),
    #[error("{field} must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: String },
    #[error("failed to read body file {path}: {source}")]
    BodyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("body file {path} must contain a JSON array: {reason}")]
    BodyFileFormat { path: PathBuf, reason: String },
    #[error("invalid profile document: {0}")]
    Profile(String),
}

/// Stage A of a chained run did not produce a usable JSON document.
#[derive(Debug, Error)]
pub enum ChainSetupError {
    #[error("stage A request timed out after {0:.2}ms")]
    Timeout(f64),
    #[error("stage A request failed: {0}")]
    Transport(String),
    #[error("stage A returned non-2xx status {0}")]
    Status(u16),
    #[error("stage A response is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ChainSetup(#[from] ChainSetupError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("a run is already in progress")]
    AlreadyRunning,
}

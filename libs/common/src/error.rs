//! Errors of the shared service plumbing

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// File extension is not one of toml, yaml, yml, json
    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    /// Parsing or extracting the layered configuration failed
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Subscriber setup failed
    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

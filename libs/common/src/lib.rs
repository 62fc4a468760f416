//! Basic library shared by the bridge service
//!
//! Provides the service plumbing that is not specific to Modbus scheduling:
//! - logging initialization
//! - layered configuration loading
//! - graceful shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_config, load_config_from_file};
pub use error::{Error, Result};
pub use logging::{LogConfig, LogFormat};
pub use shutdown::{wait_for_shutdown, ShutdownSignal};

// Re-export common dependencies
pub use serde;
pub use tokio;

//! CLI error types and conversions

use crate::collector::cache::CacheError;
use crate::collector::CollectError;
use crate::output::OutputError;
use crate::registry::RegistryError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Collection run failed
    #[error("collection error: {0}")]
    CollectError(#[from] CollectError),

    /// Cache integrity error outside a collection run
    #[error("cache error: {0}")]
    CacheError(#[from] CacheError),

    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Station lookup did not succeed
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

//! Completion backends
//!
//! Executors for CLI and HTTP-based LLM backends, a retry wrapper, and a
//! service that turns raw model output into schema-checked JSON.
//!
//! # Example
//!
//! ```ignore
//! use dayflow::completion::{create_service, BackendRequest};
//!
//! let service = create_service("openai", &config)?;
//! let request = BackendRequest::new("Summarize this commit");
//! let completion = service.complete(&request, Some(&schema)).await?;
//! ```

mod cli_backend;
mod http_backend;
mod output_parser;
mod retry;
mod service;
mod types;

pub use cli_backend::CliBackend;
pub use http_backend::HttpBackend;
pub use output_parser::extract_json;
pub use retry::{RetryExecutor, with_retry};
pub use service::{Completion, CompletionService};
pub use types::{
    BackendError, BackendExecutor, BackendRequest, BackendResponse, RetryPolicy, TokenUsage,
};

#[cfg(test)]
pub(crate) use service::tests::ScriptedBackend;

use crate::config::BackendConfig;
use std::sync::Arc;

/// Create the executor matching a backend config
pub fn create_executor(
    name: &str,
    config: &BackendConfig,
) -> Result<Box<dyn BackendExecutor>, BackendError> {
    if config.command.trim().is_empty() {
        return Err(BackendError::config(format!("backend '{}' has no command", name)));
    }

    if config.is_http() {
        Ok(Box::new(HttpBackend::from_config(name, config)?))
    } else {
        Ok(Box::new(CliBackend::from_config(name, config)))
    }
}

/// Executor wrapped with the config's retry policy, behind a service
pub fn create_service(name: &str, config: &BackendConfig) -> Result<CompletionService, BackendError> {
    let executor = create_executor(name, config)?;
    let policy = RetryPolicy::from_config(config);
    Ok(CompletionService::new(Arc::new(with_retry(executor, policy))))
}

//! Shared plumbing for the OpenAI-backed collaborators.

use std::future::Future;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;

use crate::config::AppConfig;
use crate::error::AppError;

/// Run one async request to completion on a private current-thread runtime.
pub fn block_on_async<T>(future: impl Future<Output = Result<T, AppError>>) -> Result<T, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Config(format!("Failed to initialize async runtime: {}", e)))?;
    runtime.block_on(future)
}

pub(crate) fn client_from_config(config: &AppConfig) -> Result<Client<OpenAIConfig>, AppError> {
    let mut openai = OpenAIConfig::new().with_api_key(config.require_api_key()?);
    if let Some(base) = config.openai_base_url.as_deref() {
        openai = openai.with_api_base(base);
    }
    Ok(Client::with_config(openai))
}

/// Await `future` for at most `limit`, mapping both the timeout and the API
/// error into `AppError::Service`.
pub(crate) async fn with_timeout<T, E: std::fmt::Display>(
    service: &'static str,
    limit: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::service(service, e)),
        Err(_) => Err(AppError::service(
            service,
            format!("timed out after {}s", limit.as_secs()),
        )),
    }
}

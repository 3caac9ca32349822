//! HTTP plumbing shared by the adapters

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Response};

/// Build a client for streaming requests.
///
/// Only the connect phase is bounded here; an overall request timeout would
/// cut long streams short. Stalls are handled by the core's token timeouts.
pub(crate) fn streaming_client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Turn a non-2xx response into an error carrying the status and body
pub(crate) async fn check_status(response: Response, vendor: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(anyhow!(
        "{} API request failed with status {}: {}",
        vendor,
        status,
        error_text
    ))
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_trims_trailing_slash() {
        assert_eq!(
            join_url("https://api.openai.com/", "/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(join_url("http://localhost:11434", "/api/chat"), "http://localhost:11434/api/chat");
    }
}

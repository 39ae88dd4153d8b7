//! Shared HTTP plumbing for the live market data adapters.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::application::ports::PluginError;

/// Upstream request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client used by a plugin.
///
/// # Errors
///
/// Returns `PluginError::InitFailed` if the TLS backend cannot be set up.
pub fn build_client(plugin: &str) -> Result<reqwest::Client, PluginError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("ohlcv-stream-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PluginError::InitFailed {
            name: plugin.to_string(),
            reason: e.to_string(),
        })
}

/// Send `request` and decode a JSON body.
///
/// # Errors
///
/// Returns `PluginError::Request` on transport failures or non-2xx status
/// and `PluginError::Decode` if the body does not match `T`.
pub async fn get_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, PluginError> {
    let response = request.send().await.map_err(|e| PluginError::Request {
        message: format!("request failed: {e}"),
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| PluginError::Request {
        message: format!("failed to read response: {e}"),
    })?;

    if !status.is_success() {
        return Err(PluginError::Request {
            message: format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
        });
    }

    serde_json::from_str(&body).map_err(|e| PluginError::Decode {
        message: format!("{e}: {}", truncate(&body)),
    })
}

fn truncate(body: &str) -> &str {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(200);
        let cut = truncate(&body);
        assert!(cut.len() <= 256);
        assert!(body.starts_with(cut));
    }

    #[test]
    fn short_body_untouched() {
        assert_eq!(truncate("oops"), "oops");
    }
}

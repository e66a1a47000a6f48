//! Reachability and embeddability pre-checks for URLs shown in frames.

use crate::mcp::error::{McpError, McpResult};
use reqwest::header::{HeaderMap, CONTENT_SECURITY_POLICY, X_FRAME_OPTIONS};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embeddability {
    Embeddable,
    Blocked(String),
}

/// Returns why the response headers forbid framing the page, if they do.
pub fn embedding_block_reason(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(X_FRAME_OPTIONS)
        .and_then(|value| value.to_str().ok())
    {
        let value = value.trim();
        if value.eq_ignore_ascii_case("deny") || value.eq_ignore_ascii_case("sameorigin") {
            return Some(format!("X-Frame-Options: {value}"));
        }
    }

    for policy in headers
        .get_all(CONTENT_SECURITY_POLICY)
        .iter()
        .filter_map(|value| value.to_str().ok())
    {
        for directive in policy.split(';') {
            let mut parts = directive.split_whitespace();
            if !parts
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case("frame-ancestors"))
            {
                continue;
            }
            let sources: Vec<&str> = parts.collect();
            if !sources.contains(&"*") {
                return Some(format!("Content-Security-Policy: {}", directive.trim()));
            }
        }
    }
    None
}

/// Checks that `url` answers and may be framed. The request is bounded by
/// `timeout` and abandoned as soon as `cancel` fires.
pub async fn check_embeddable(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> McpResult<Embeddability> {
    let fetch = async {
        let response = client.head(url).timeout(timeout).send().await?;
        let response = if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            client.get(url).timeout(timeout).send().await?
        } else {
            response
        };
        if !response.status().is_success() {
            return Err(McpError::transport_with_code(
                format!("{url} answered {}", response.status()),
                i64::from(response.status().as_u16()),
                None,
            ));
        }
        Ok(match embedding_block_reason(response.headers()) {
            Some(reason) => Embeddability::Blocked(reason),
            None => Embeddability::Embeddable,
        })
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(url, "Embeddability check cancelled");
            Err(McpError::transport("Embeddability check cancelled."))
        }
        result = fetch => result,
    }
}

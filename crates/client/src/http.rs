//! Request plumbing shared by the upstream clients.

use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::UpstreamError;

pub(crate) const USER_AGENT: &str = concat!("callctx/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(service: &'static str, timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| UpstreamError::from_reqwest(service, e))
}

/// Parse an upstream base URL. Only http(s) URLs can carry paths.
pub(crate) fn parse_base_url(base: &str) -> Result<Url, UpstreamError> {
    let url = Url::parse(base).map_err(|e| UpstreamError::InvalidUrl(format!("{base}: {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(UpstreamError::InvalidUrl(format!("{base}: not an http(s) URL")));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send a request and return the raw response without checking its status.
pub(crate) async fn send(service: &'static str, request: RequestBuilder) -> Result<Response, UpstreamError> {
    let start = Instant::now();
    let response = request.send().await.map_err(|e| UpstreamError::from_reqwest(service, e))?;
    tracing::debug!(
        service,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "upstream response"
    );
    Ok(response)
}

/// Fail on any non-2xx status, logging the body.
pub(crate) async fn check(service: &'static str, response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(service, status = status.as_u16(), %body, "upstream returned an error");
    Err(UpstreamError::Http { service, status: status.as_u16() })
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    service: &'static str, response: Response,
) -> Result<T, UpstreamError> {
    let bytes = response.bytes().await.map_err(|e| UpstreamError::from_reqwest(service, e))?;
    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::parse(service, e))
}

/// `send`, `check` and `read_json` in one go.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str, request: RequestBuilder,
) -> Result<T, UpstreamError> {
    let response = check(service, send(service, request).await?).await?;
    read_json(service, response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let base = parse_base_url("https://api.example.com/v1").unwrap();
        assert_eq!(endpoint(&base, &["users", "42"]).as_str(), "https://api.example.com/v1/users/42");

        let base = parse_base_url("https://api.example.com/").unwrap();
        assert_eq!(endpoint(&base, &["users"]).as_str(), "https://api.example.com/users");
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let base = parse_base_url("https://api.example.com").unwrap();
        assert_eq!(endpoint(&base, &["sessions", "a/b c"]).as_str(), "https://api.example.com/sessions/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(parse_base_url("not a url"), Err(UpstreamError::InvalidUrl(_))));
        assert!(matches!(parse_base_url("mailto:ops@example.com"), Err(UpstreamError::InvalidUrl(_))));
    }
}

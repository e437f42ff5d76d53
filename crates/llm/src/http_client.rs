//! HTTP Client Factory
//!
//! Builds the shared `reqwest::Client` and the two request shapes every
//! endpoint uses: a JSON call and a streamed body.

use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use wiki_lens_core::proxy::ProxyConfig;

use crate::error::{parse_http_error, TransportError, TransportResult};
use crate::stream_reader::ByteStream;

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(proxy)` -> configure proxy on the client
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
///
/// No overall timeout is set on the client: analysis streams may run for
/// minutes. Opening a response is bounded separately by [`send_with_timeout`].
pub fn build_http_client(
    proxy: Option<&ProxyConfig>,
    connect_timeout: Duration,
) -> TransportResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
    match proxy {
        Some(cfg) => {
            let mut p = reqwest::Proxy::all(cfg.url())
                .map_err(|e| TransportError::InvalidRequest {
                    message: format!("invalid proxy {}: {}", cfg.url(), e),
                })?;
            if let (Some(u), Some(pw)) = (&cfg.username, &cfg.password) {
                p = p.basic_auth(u, pw);
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(TransportError::from)
}

/// Send a request and wait for the response head, at most `timeout`.
///
/// Non-success statuses are turned into typed errors.
pub async fn send_with_timeout(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> TransportResult<reqwest::Response> {
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| TransportError::Timeout {
            message: format!("no response within {}s", timeout.as_secs()),
        })??;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(parse_http_error(status.as_u16(), &body, retry_after))
}

/// Send a request and decode its JSON body.
pub async fn fetch_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> TransportResult<T> {
    let response = send_with_timeout(request, timeout).await?;
    response.json::<T>().await.map_err(TransportError::from)
}

/// Send a request and hand back its body as a byte stream.
pub async fn open_stream(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> TransportResult<ByteStream> {
    let response = send_with_timeout(request, timeout).await?;
    Ok(response
        .bytes_stream()
        .map_err(|e| TransportError::network(e.to_string()))
        .boxed())
}

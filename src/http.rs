//! HTTP client utilities for opening event-stream requests.
//!
//! This module provides reusable HTTP client construction and
//! request building logic that can be shared across providers.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use std::collections::HashMap;
use tracing::{debug, error};

use crate::client::ClientError;
use crate::options::TransportOptions;
use crate::providers::ProviderKind;

/// Identifier sent in the `Client` header of every request.
pub const CLIENT_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Header carrying [`CLIENT_ID`].
pub const CLIENT_HEADER: &str = "client";

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
pub fn build_http_client(transport_options: &TransportOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy URL {proxy_url}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport options.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Start a `POST` that asks for a `text/event-stream` response.
///
/// Sets the headers common to every backend; callers add their credential
/// header and JSON body.
pub fn event_stream_request(
    transport_options: &TransportOptions,
    url: &str,
) -> Result<RequestBuilder, ClientError> {
    let http_client = build_http_client(transport_options)?;

    let req = http_client
        .post(url)
        .header(ACCEPT, "text/event-stream")
        .header(CONTENT_TYPE, "application/json")
        .header(CLIENT_HEADER, CLIENT_ID);

    Ok(add_extra_headers(req, &transport_options.extra_headers))
}

/// Reject a response whose status is not a success, without reading its body.
pub fn check_status(provider: ProviderKind, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        debug!(%provider, %status, "stream opened");
        return Ok(response);
    }

    let message = status.canonical_reason().unwrap_or("unknown status").to_string();
    error!(%provider, %status, "sampling request rejected");
    Err(ClientError::Status {
        provider,
        status,
        message,
    })
}

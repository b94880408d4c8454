//! Upstream forwarding.
//!
//! Rewrites the request onto the configured upstream, keeping the method,
//! path, query and end-to-end headers, and streams both bodies. Redirects are
//! handed back to the client rather than followed.

use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::response::Response;
use http::header::{self, HeaderMap, HeaderName};
use http::Uri;
use tracing::debug;
use url::Url;

use crate::error::{ForwardError, Result};

/// Time allowed to establish a connection to the upstream.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection-scoped headers that must not be forwarded (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards authenticated requests to the upstream service.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    upstream: Url,
}

impl Forwarder {
    /// Creates a forwarder for `upstream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(upstream: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, upstream })
    }

    /// The upstream base URL.
    #[must_use]
    pub const fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Maps an inbound request target onto the upstream, preserving path
    /// and query.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewritten URL does not parse.
    pub fn target_url(&self, uri: &Uri) -> std::result::Result<Url, ForwardError> {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = format!(
            "{}{}",
            self.upstream.as_str().trim_end_matches('/'),
            path_and_query
        );
        Url::parse(&url).map_err(|e| ForwardError::InvalidTarget(format!("'{url}': {e}")))
    }

    /// Sends `request` upstream and returns the upstream response.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream cannot be reached or the response
    /// cannot be relayed. The caller answers these with `502 Bad Gateway`.
    pub async fn forward(&self, request: Request) -> std::result::Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let url = self.target_url(&parts.uri)?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!(method = %parts.method, url = %url, "Forwarding request upstream");

        let mut builder = self.client.request(parts.method, url).headers(headers);
        if !body.is_end_stream() {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = builder.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::builder()
            .status(status)
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ForwardError::InvalidResponse(e.to_string()))?;
        *response.headers_mut() = response_headers;

        Ok(response)
    }
}

/// Removes hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

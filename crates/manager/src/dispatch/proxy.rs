//! Request/response shaping for proxied plugin calls.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use url::Url;

/// Set on the outbound request to the host the tenant called.
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Set on the outbound request to the plugin's own host.
pub const X_ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");

/// Hop-by-hop headers (RFC 9110 section 7.6.1) never forwarded in either
/// direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// An inbound call to be forwarded to a plugin.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, headers: HeaderMap, query: Option<String>, body: Bytes) -> Self {
        Self {
            method,
            headers,
            query,
            body,
        }
    }

    /// Host the tenant addressed, if any.
    pub fn inbound_host(&self) -> Option<&HeaderValue> {
        self.headers.get(header::HOST)
    }
}

/// A plugin's reply, buffered.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Build `<base>/<segments...>?<query>`.
pub fn target_url(base: &str, segments: &[&str], query: Option<&str>) -> Result<Url, String> {
    let mut url = Url::parse(base).map_err(|e| format!("invalid plugin url {base:?}: {e}"))?;
    url.path_segments_mut()
        .map_err(|()| format!("plugin url cannot be a base: {base}"))?
        .pop_if_empty()
        .extend(segments);
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

/// Drop hop-by-hop headers, including any the `Connection` header names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Headers for the outbound request to `target`.
///
/// `Host` and `Content-Length` are recomputed by the client. Identity headers
/// (`X-Id`, `X-Role`) pass through unchanged.
pub fn outbound_headers(req: &ProxyRequest, target: &Url) -> HeaderMap {
    let mut headers = req.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if let Some(host) = req.inbound_host() {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    if let Some(origin) = target_authority(target).and_then(|h| HeaderValue::from_str(&h).ok()) {
        headers.insert(X_ORIGIN_HOST, origin);
    }
    headers
}

/// Headers returned to the tenant.
pub fn inbound_headers(mut headers: HeaderMap) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);
    headers
}

fn target_authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

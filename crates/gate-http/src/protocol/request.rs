//! Request head and per-request context types.
//!
//! [`RequestHeader`] wraps the standard `http::Request` head as parsed off
//! the wire. [`RequestContext`] is the fixed-field view of a request that
//! the pipeline hands to validators and handlers: method plus the header
//! subset the front end cares about (client ip and host).

use std::net::SocketAddr;

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// The head of an HTTP request, without its body.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Value of the `Host` header, if present and valid UTF-8.
    pub fn host(&self) -> Option<&str> {
        self.inner.headers().get(http::header::HOST).and_then(|value| value.to_str().ok())
    }

    /// The client address as reported by a fronting proxy.
    ///
    /// `x-real-ip` wins over `x-forwarded-for`; the caller falls back to the
    /// socket's peer address when neither is present.
    pub fn forwarded_ip(&self) -> Option<&str> {
        const IP_HEADERS: [&str; 2] = ["x-real-ip", "x-forwarded-for"];

        IP_HEADERS.iter().find_map(|name| self.inner.headers().get(*name).and_then(|value| value.to_str().ok()))
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// Fixed-field request view passed to the validation hook and the handler.
///
/// Built once per request when its head arrives; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    client_ip: Option<String>,
    host: Option<String>,
}

impl RequestContext {
    pub fn new(header: &RequestHeader, peer_addr: Option<SocketAddr>) -> Self {
        let client_ip = header
            .forwarded_ip()
            .map(str::to_string)
            .or_else(|| peer_addr.map(|addr| addr.ip().to_string()));

        Self { method: header.method().clone(), client_ip, host: header.host().map(str::to_string) }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

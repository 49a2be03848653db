// src/proxy/http.rs
// HTTP/1.1 forwarding over hyper's client.

use super::backend::Backend;
use super::forwarder::{ForwardError, Forwarder};
use crate::retry::{RetryDecision, RetryStrategy};
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Method, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use url::Url;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// An inbound request with its body read into memory, so that it can be
/// replayed against another backend.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub async fn from_hyper(req: Request<Body>) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        })
    }

    fn path_and_query(&self) -> (&str, Option<&str>) {
        match self.uri.path_and_query() {
            Some(pq) => (pq.path(), pq.query()),
            None => ("/", None),
        }
    }
}

#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        let https = HttpsConnector::new();
        let client = Client::builder().build::<_, Body>(https);
        Self { client }
    }

    fn build_request(&self, backend: &Backend, request: &HttpRequest) -> Result<Request<Body>, ForwardError> {
        let target = target_url(&backend.url, request);
        let uri: Uri = target
            .as_str()
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ForwardError::Transport(e.to_string()))?;

        let mut outbound = Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Body::from(request.body.clone()))
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let headers = outbound.headers_mut();
        for (name, value) in request.headers.iter() {
            if *name == header::HOST || HOP_BY_HOP.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if let Some(host) = host_header(&backend.url) {
            headers.insert(header::HOST, host);
        }

        Ok(outbound)
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    type Request = HttpRequest;
    type Response = Response<Body>;

    async fn forward(
        &self,
        backend: &Backend,
        request: &HttpRequest,
    ) -> Result<Response<Body>, ForwardError> {
        let outbound = self.build_request(backend, request)?;

        let response = self.client.request(outbound).await.map_err(|e| {
            if e.is_connect() {
                ForwardError::Connect(e.to_string())
            } else {
                ForwardError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if RetryStrategy::is_retryable_status(status) == RetryDecision::Retry {
            return Err(ForwardError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

/// Backend base URL with the request's path appended to any base path.
fn target_url(base: &Url, request: &HttpRequest) -> Url {
    let (path, query) = request.path_and_query();
    let mut target = base.clone();
    let prefix = base.path().trim_end_matches('/');
    target.set_path(&format!("{}{}", prefix, path));
    target.set_query(query);
    target
}

fn host_header(url: &Url) -> Option<HeaderValue> {
    let host = url.host_str()?;
    let value = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).ok()
}

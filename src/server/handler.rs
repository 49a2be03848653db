// src/server/handler.rs
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use crate::balancer::LoadBalancer;
use crate::proxy::{HttpForwarder, HttpRequest, ProxyError};

/// Per-connection service: answers the status path itself and hands every
/// other request to the balancer.
#[derive(Clone)]
pub struct RequestHandler {
    balancer: Arc<LoadBalancer<HttpForwarder>>,
    status_path: Arc<str>,
}

impl RequestHandler {
    pub fn new(balancer: Arc<LoadBalancer<HttpForwarder>>, status_path: &str) -> Self {
        Self {
            balancer,
            status_path: Arc::from(status_path),
        }
    }

    async fn handle(self, req: Request<Body>) -> Response<Body> {
        if req.method() == Method::GET && req.uri().path() == &*self.status_path {
            return self.status_report().await;
        }

        let request = match HttpRequest::from_hyper(req).await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%err, "failed to read request body");
                return plain(StatusCode::BAD_REQUEST, "Bad request");
            }
        };

        match self.balancer.handle_request(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%err, method = %request.method, uri = %request.uri, "proxy error");
                err.into()
            }
        }
    }

    async fn status_report(&self) -> Response<Body> {
        let reports = self.balancer.backend_reports().await;
        match serde_json::to_vec(&reports) {
            Ok(json) => {
                let mut response = Response::new(Body::from(json));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(err) => {
                tracing::error!(%err, "failed to encode backend report");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoBackendsAvailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "No backends available")
            }
            ProxyError::AllBackendsDead => {
                (StatusCode::SERVICE_UNAVAILABLE, "All backends are down")
            }
            ProxyError::RetriesExhausted { ref last, .. } if last.is_timeout() => {
                (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout")
            }
            ProxyError::RetriesExhausted { .. } => (StatusCode::BAD_GATEWAY, "Bad gateway"),
        };

        plain(status, message)
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

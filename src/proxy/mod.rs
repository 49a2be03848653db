//
// src/proxy/mod.rs
//
mod backend;
mod dispatcher;
mod forwarder;
mod http;
mod registry;

pub use backend::{Backend, BackendMetrics, BackendReport, ConnectionGuard, HealthRecord};
pub use dispatcher::{ProxyDispatcher, ProxyError};
pub use forwarder::{ForwardError, Forwarder};
pub use http::{HttpForwarder, HttpRequest};
pub use registry::{BackendRegistry, RegistryError, Snapshot};

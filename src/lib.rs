// src/lib.rs
pub mod balancer;
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod server;

pub use balancer::{LoadBalancer, LoadBalancerBuilder};

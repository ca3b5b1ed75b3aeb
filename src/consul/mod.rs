/**
 * Consul-backed watch caches built on the generic engine in `crate::cache`
 */
pub mod client;
pub mod health;
pub mod kv;

pub use client::{ConsulClient, DEFAULT_ADDRESS};
pub use health::{
    HealthCheck, Node, Service, ServiceHealth, ServiceHealthKey, State, checks_by_state_cache, node_checks_cache,
    service_health_cache,
};
pub use kv::{Value, kv_cache, kv_key_extractor, prepare_root_path};

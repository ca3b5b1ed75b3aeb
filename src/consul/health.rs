/**
 * Watch caches over health data: per-node checks, checks by state, and
 * per-service health
 */
use super::client::ConsulClient;
use crate::cache::{CacheConfig, CacheError, FetchError, FetchRequest, FetchResponse, Fetcher, QueryOptions, WatchCache};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Check states as the health endpoints name them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pass,
    Warn,
    Fail,
    Any,
    Unknown,
}

impl State {
    /// Short form used by the agent check endpoints, e.g. `pass`
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Any => "any",
            Self::Unknown => "unknown",
        }
    }

    /// Name used when querying by health state, e.g. `passing`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pass => "passing",
            Self::Warn => "warning",
            Self::Fail => "critical",
            Self::Any => "any",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pass, Self::Warn, Self::Fail, Self::Any, Self::Unknown]
            .into_iter()
            .find(|state| state.name() == s || state.path() == s)
            .ok_or_else(|| format!("unknown health state: {s}"))
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    pub node: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    pub name: String,
    pub status: String,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: String,
    #[serde(default, deserialize_with = "nullable")]
    pub output: String,
    #[serde(rename = "ServiceID", default, deserialize_with = "nullable")]
    pub service_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub service_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub service_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "Node")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub address: String,
    #[serde(default)]
    pub datacenter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceHealth {
    pub node: Node,
    pub service: Service,
    #[serde(default, deserialize_with = "nullable")]
    pub checks: Vec<HealthCheck>,
}

/// Identity of one service instance: the same service id may run on several hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceHealthKey {
    pub service_id: String,
    pub host: String,
    pub port: u16,
}

impl ServiceHealthKey {
    /// Host is the service address, falling back to the node address when unset
    #[must_use]
    pub fn from_service_health(health: &ServiceHealth) -> Self {
        let host = if health.service.address.is_empty() {
            health.node.address.clone()
        } else {
            health.service.address.clone()
        };
        Self {
            service_id: health.service.id.clone(),
            host,
            port: health.service.port,
        }
    }
}

/// Fetches `HealthCheck` lists from `/v1/health/{kind}/{name}`
#[derive(Debug, Clone)]
pub struct HealthChecksFetcher {
    client: ConsulClient,
    segments: [String; 4],
}

impl HealthChecksFetcher {
    fn new(client: ConsulClient, kind: &str, name: &str) -> Self {
        Self {
            client,
            segments: ["v1".to_string(), "health".to_string(), kind.to_string(), name.to_string()],
        }
    }
}

#[async_trait]
impl Fetcher for HealthChecksFetcher {
    type Entry = HealthCheck;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse<HealthCheck>, FetchError> {
        self.client.blocking_get(&self.segments, &[], &request, false).await
    }

    fn describe(&self) -> String {
        self.segments.join("/")
    }
}

#[derive(Debug, Clone)]
pub struct ServiceHealthFetcher {
    client: ConsulClient,
    service: String,
    passing: bool,
}

#[async_trait]
impl Fetcher for ServiceHealthFetcher {
    type Entry = ServiceHealth;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse<ServiceHealth>, FetchError> {
        let segments = ["v1", "health", "service", self.service.as_str()];
        let extra = if self.passing {
            vec![("passing", "true".to_string())]
        } else {
            Vec::new()
        };
        self.client.blocking_get(&segments, &extra, &request, false).await
    }

    fn describe(&self) -> String {
        format!("v1/health/service/{}", self.service)
    }
}

/// Watch the checks registered on `node`, keyed by check id.
///
/// # Errors
///
/// Returns `CacheError::Config` if `config` is invalid
pub fn node_checks_cache(
    client: ConsulClient,
    node: &str,
    config: CacheConfig,
    options: QueryOptions,
) -> Result<WatchCache<String, HealthCheck>, CacheError> {
    let fetcher = HealthChecksFetcher::new(client, "node", node);
    WatchCache::new(fetcher, |check: &HealthCheck| check.check_id.clone(), config, options)
}

/// Watch every check currently in `state`, keyed by check id.
///
/// # Errors
///
/// Returns `CacheError::Config` if `config` is invalid
pub fn checks_by_state_cache(
    client: ConsulClient,
    state: State,
    config: CacheConfig,
    options: QueryOptions,
) -> Result<WatchCache<String, HealthCheck>, CacheError> {
    let fetcher = HealthChecksFetcher::new(client, "state", state.name());
    WatchCache::new(fetcher, |check: &HealthCheck| check.check_id.clone(), config, options)
}

/// Watch the instances of `service`; only passing ones if `passing` is set.
///
/// # Errors
///
/// Returns `CacheError::Config` if `config` is invalid
pub fn service_health_cache(
    client: ConsulClient,
    service: &str,
    passing: bool,
    config: CacheConfig,
    options: QueryOptions,
) -> Result<WatchCache<ServiceHealthKey, ServiceHealth>, CacheError> {
    let fetcher = ServiceHealthFetcher {
        client,
        service: service.to_string(),
        passing,
    };
    WatchCache::new(fetcher, ServiceHealthKey::from_service_health, config, options)
}

/**
 * Watch cache over a key/value subtree (`GET /v1/kv/{root}?recurse`)
 */
use super::client::ConsulClient;
use crate::cache::{CacheConfig, CacheError, FetchError, FetchRequest, FetchResponse, Fetcher, QueryOptions, WatchCache};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Value {
    pub key: String,
    /// Raw bytes, decoded from the base64 the API returns
    #[serde(default, deserialize_with = "decode_base64")]
    pub value: Option<Vec<u8>>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub session: Option<String>,
}

impl Value {
    /// The value as UTF-8 text, if present
    #[must_use]
    pub fn value_as_string(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

fn decode_base64<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|encoded| STANDARD.decode(encoded.as_bytes()))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Strip leading slashes; the API addresses keys without them.
#[must_use]
pub fn prepare_root_path(root_path: &str) -> String {
    root_path.trim_start_matches('/').to_string()
}

/// Key extractor yielding keys relative to the directory of `root_path`.
///
/// `root_path` must already be prepared with `prepare_root_path`. A key equal to
/// the root maps to the empty string; keys outside the root directory are kept whole.
pub fn kv_key_extractor(root_path: &str) -> impl Fn(&Value) -> String + Send + Sync + 'static {
    let root = root_path.to_string();
    move |value: &Value| relative_key(&root, &value.key).to_string()
}

fn relative_key<'a>(root: &str, key: &'a str) -> &'a str {
    let Some(last_slash) = root.rfind('/') else {
        return key;
    };
    if key == root {
        return "";
    }
    key.strip_prefix(&root[..=last_slash]).unwrap_or(key)
}

/// Path segments for a prepared root; `/` inside the root separates segments.
fn kv_segments(root_path: &str) -> Vec<&str> {
    ["v1", "kv"].into_iter().chain(root_path.split('/')).collect()
}

#[derive(Debug, Clone)]
pub struct KvFetcher {
    client: ConsulClient,
    root_path: String,
}

impl KvFetcher {
    #[must_use]
    pub fn new(client: ConsulClient, root_path: &str) -> Self {
        Self {
            client,
            root_path: prepare_root_path(root_path),
        }
    }
}

#[async_trait]
impl Fetcher for KvFetcher {
    type Entry = Value;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse<Value>, FetchError> {
        let segments = kv_segments(&self.root_path);
        self.client
            .blocking_get(&segments, &[("recurse", "true".to_string())], &request, true)
            .await
    }

    fn describe(&self) -> String {
        format!("kv:{}", self.root_path)
    }
}

/// Watch every key under `root_path`, keyed relative to the root's directory.
///
/// # Errors
///
/// Returns `CacheError::Config` if `config` is invalid
pub fn kv_cache(
    client: ConsulClient,
    root_path: &str,
    config: CacheConfig,
    options: QueryOptions,
) -> Result<WatchCache<String, Value>, CacheError> {
    let root = prepare_root_path(root_path);
    WatchCache::new(
        KvFetcher::new(client, &root),
        kv_key_extractor(&root),
        config,
        options,
    )
}

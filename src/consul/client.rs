/**
 * HTTP plumbing shared by the Consul watch caches
 */
use crate::cache::{FetchError, FetchRequest, FetchResponse, Index};
use crate::error::{Error, Result as CwResult};
use reqwest::{StatusCode, Url};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Default user agent - automatically uses the package version
///
/// Can be overridden via the `CONSULWATCH_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Local agent address used when none is given
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8500";

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ConsulClient {
    /// Create a client for the agent at `base_url`
    ///
    /// # Errors
    ///
    /// Will return `Err` if `base_url` is not an HTTP(S) URL or the underlying
    /// HTTP client cannot be built
    pub fn new(base_url: &str) -> CwResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Custom(format!("invalid agent address {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Custom(format!("agent address {base_url} cannot hold a path")));
        }

        let user_agent =
            std::env::var("CONSULWATCH_USER_AGENT").unwrap_or_else(|_| USER_AGENT.to_string());
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;

        Ok(Self { http, base_url })
    }

    /// Append `segments` to the agent address, percent-encoding each one.
    ///
    /// An empty segment keeps its slash, so `["v1", "kv", "app", ""]` ends in `app/`.
    #[must_use]
    pub fn url<S: AsRef<str>>(&self, segments: &[S]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Issue one blocking `GET` and decode a JSON array response.
    ///
    /// `not_found_is_empty` treats HTTP 404 as an empty result, which is how the
    /// KV endpoint reports a missing prefix.
    pub(crate) async fn blocking_get<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        segments: &[S],
        extra: &[(&'static str, String)],
        request: &FetchRequest,
        not_found_is_empty: bool,
    ) -> Result<FetchResponse<T>, FetchError> {
        let url = self.url(segments);
        let mut query = request.options.query_pairs();
        query.extend(extra.iter().cloned());

        let mut builder = self.http.get(url.clone()).query(&query);
        if let Some(token) = &request.options.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(timeout) = request.read_timeout {
            builder = builder.timeout(timeout);
        }

        debug!(url = %url, index = ?request.index(), "Issuing blocking query");
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let index = parse_index(response.headers());
        let body = response.bytes().await.map_err(transport_error)?;

        let entries = decode_entries(status, &body, not_found_is_empty)?;
        Ok(FetchResponse::new(entries, index?))
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    FetchError::Transport(e.to_string())
}

pub(crate) fn parse_index(headers: &HeaderMap) -> Result<Index, FetchError> {
    let value = headers.get(INDEX_HEADER).ok_or(FetchError::MissingIndex)?;
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| FetchError::Decode(format!("malformed {INDEX_HEADER} header: {value:?}")))
}

pub(crate) fn decode_entries<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
    not_found_is_empty: bool,
) -> Result<Vec<T>, FetchError> {
    if status == StatusCode::NOT_FOUND && not_found_is_empty {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).trim().to_string(),
        });
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice::<Option<Vec<T>>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| FetchError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_url_joining() {
        let client = ConsulClient::new("http://localhost:8500/").unwrap();
        assert_eq!(client.url(&["v1", "kv", "app"]).as_str(), "http://localhost:8500/v1/kv/app");
        assert_eq!(
            client.url(&["v1", "kv", "app", ""]).as_str(),
            "http://localhost:8500/v1/kv/app/"
        );

        let prefixed = ConsulClient::new("https://gateway.example/consul").unwrap();
        assert_eq!(
            prefixed.url(&["v1", "health", "node", "n1"]).as_str(),
            "https://gateway.example/consul/v1/health/node/n1"
        );
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let client = ConsulClient::new("http://localhost:8500").unwrap();
        let url = client.url(&["v1", "health", "service", "web api?x=1#frag%"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8500/v1/health/service/web%20api%3Fx=1%23frag%25"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(ConsulClient::new("not a url").is_err());
        assert!(ConsulClient::new("mailto:ops@example.com").is_err());
    }

    #[test]
    fn test_parse_index() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_index(&headers), Err(FetchError::MissingIndex));

        headers.insert(INDEX_HEADER, HeaderValue::from_static("1234"));
        assert_eq!(parse_index(&headers), Ok(Index::new(1234)));

        headers.insert(INDEX_HEADER, HeaderValue::from_static("not-a-number"));
        let err = parse_index(&headers).unwrap_err();
        assert!(matches!(&err, FetchError::Decode(msg) if msg.contains("not-a-number")));
    }

    #[test]
    fn test_decode_entries() {
        let entries: Vec<u32> = decode_entries(StatusCode::OK, b"[1, 2, 3]", false).unwrap();
        assert_eq!(entries, vec![1, 2, 3]);

        let entries: Vec<u32> = decode_entries(StatusCode::OK, b"null", false).unwrap();
        assert!(entries.is_empty());

        let entries: Vec<u32> = decode_entries(StatusCode::NOT_FOUND, b"", true).unwrap();
        assert!(entries.is_empty());

        let err = decode_entries::<u32>(StatusCode::NOT_FOUND, b"", false).unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));

        let err = decode_entries::<u32>(StatusCode::INTERNAL_SERVER_ERROR, b"rpc error\n", false)
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Http {
                status: 500,
                body: "rpc error".to_string()
            }
        );

        let err = decode_entries::<u32>(StatusCode::OK, b"{", false).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}

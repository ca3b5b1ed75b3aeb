/**
 * Query options for blocking queries
 *
 * The cache owns `index` and `wait`; everything else comes from the caller and
 * is passed through untouched on every cycle.
 */
use super::errors::CacheError;
use super::index::Index;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConsistencyMode {
    #[default]
    Default,
    Consistent,
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub index: Option<Index>,
    pub wait: Option<String>,
    pub consistency_mode: ConsistencyMode,
    pub token: Option<String>,
    pub near: Option<String>,
    pub datacenter: Option<String>,
    pub tags: Vec<String>,
    pub node_meta: BTreeMap<String, String>,
    pub filter: Option<String>,
}

impl QueryOptions {
    /// Options with every field unset
    pub const BLANK: Self = Self {
        index: None,
        wait: None,
        consistency_mode: ConsistencyMode::Default,
        token: None,
        near: None,
        datacenter: None,
        tags: Vec::new(),
        node_meta: BTreeMap::new(),
        filter: None,
    };

    #[must_use]
    pub fn with_consistency_mode(mut self, mode: ConsistencyMode) -> Self {
        self.consistency_mode = mode;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_near(mut self, near: impl Into<String>) -> Self {
        self.near = Some(near.into());
        self
    }

    #[must_use]
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_node_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_meta.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Render as URL query parameters. The token is left out; it travels as a header.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(index) = self.index {
            pairs.push(("index", index.to_string()));
        }
        if let Some(wait) = &self.wait {
            pairs.push(("wait", wait.clone()));
        }
        match self.consistency_mode {
            ConsistencyMode::Default => {}
            ConsistencyMode::Consistent => pairs.push(("consistent", String::new())),
            ConsistencyMode::Stale => pairs.push(("stale", String::new())),
        }
        if let Some(near) = &self.near {
            pairs.push(("near", near.clone()));
        }
        if let Some(dc) = &self.datacenter {
            pairs.push(("dc", dc.clone()));
        }
        for tag in &self.tags {
            pairs.push(("tag", tag.clone()));
        }
        for (key, value) in &self.node_meta {
            pairs.push(("node-meta", format!("{key}:{value}")));
        }
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.clone()));
        }
        pairs
    }
}

/// Build the options for one blocking query.
///
/// # Errors
///
/// Returns `CacheError::InvalidQueryOptions` if `base` already sets `index` or `wait`
pub fn watch_params(
    index: Option<Index>,
    wait_seconds: u64,
    base: &QueryOptions,
) -> Result<QueryOptions, CacheError> {
    if base.index.is_some() {
        return Err(CacheError::InvalidQueryOptions("index"));
    }
    if base.wait.is_some() {
        return Err(CacheError::InvalidQueryOptions("wait"));
    }

    Ok(QueryOptions {
        index,
        wait: Some(format!("{wait_seconds}s")),
        ..base.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_params_with_no_additional_options() {
        let expected = QueryOptions {
            index: Some(Index::new(12)),
            wait: Some("10s".to_string()),
            ..QueryOptions::default()
        };

        let actual = watch_params(Some(Index::new(12)), 10, &QueryOptions::BLANK).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_watch_params_with_additional_options() {
        let additional = QueryOptions::default()
            .with_consistency_mode(ConsistencyMode::Stale)
            .with_tag("someTag")
            .with_token("186596")
            .with_near("156892");

        let expected = QueryOptions {
            index: Some(Index::new(12)),
            wait: Some("10s".to_string()),
            ..additional.clone()
        };

        let actual = watch_params(Some(Index::new(12)), 10, &additional).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_watch_params_rejects_owned_fields() {
        let base = QueryOptions {
            index: Some(Index::new(12)),
            wait: Some("10s".to_string()),
            ..QueryOptions::default().with_tag("someTag")
        };
        assert!(matches!(
            watch_params(Some(Index::new(12)), 10, &base),
            Err(CacheError::InvalidQueryOptions(_))
        ));

        let only_wait = QueryOptions {
            wait: Some("5s".to_string()),
            ..QueryOptions::default()
        };
        assert!(matches!(
            watch_params(None, 10, &only_wait),
            Err(CacheError::InvalidQueryOptions("wait"))
        ));
    }

    #[test]
    fn test_first_query_has_no_index() {
        let params = watch_params(None, 30, &QueryOptions::BLANK).unwrap();
        assert_eq!(params.index, None);
        assert_eq!(params.query_pairs(), vec![("wait", "30s".to_string())]);
    }

    #[test]
    fn test_query_pairs() {
        let options = QueryOptions {
            index: Some(Index::new(7)),
            wait: Some("10s".to_string()),
            ..QueryOptions::default()
                .with_consistency_mode(ConsistencyMode::Consistent)
                .with_datacenter("dc1")
                .with_tag("a")
                .with_tag("b")
                .with_node_meta("rack", "r1")
                .with_token("secret")
        };

        let pairs = options.query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("index", "7".to_string()),
                ("wait", "10s".to_string()),
                ("consistent", String::new()),
                ("dc", "dc1".to_string()),
                ("tag", "a".to_string()),
                ("tag", "b".to_string()),
                ("node-meta", "rack:r1".to_string()),
            ]
        );
    }
}

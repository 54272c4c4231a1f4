//! Data model: `Backend` and `Cluster`.

use std::sync::Arc;

use url::Url;

/// A single S3-compatible endpoint. Immutable after ring construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    pub url: Url,
    /// Maintained backends are excluded from all routing.
    pub maintained: bool,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Backend {
            url,
            maintained: false,
        }
    }

    pub fn maintained(url: Url) -> Self {
        Backend {
            url,
            maintained: true,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A named, weighted set of backends sharing a replication policy.
///
/// Invariant: `weight >= 1`; `backends` is non-empty; names are unique within a [`Config`]
/// (enforced by [`crate::config::Config::validate`] before a `Cluster` is ever built).
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub weight: u32,
    pub backends: Arc<Vec<Backend>>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, weight: u32, backends: Vec<Backend>) -> Self {
        assert!(weight >= 1, "cluster weight must be >= 1");
        assert!(!backends.is_empty(), "cluster backend set must be non-empty");
        Cluster {
            name: name.into(),
            weight,
            backends: Arc::new(backends),
        }
    }

    /// Non-maintained backends only — the set that actually receives traffic.
    pub fn routable_backends(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter().filter(|b| !b.maintained)
    }
}

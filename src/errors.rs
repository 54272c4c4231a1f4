//! Error kinds shared across the proxy. Mirrors the single flat `Error` enum idiom used by
//! smaller, focused crates in the wider codebase (see e.g. `network-proxy::errors::Error`):
//! one `thiserror` enum, short single-line messages, `#[from]` for the common conversions.

use thiserror::Error;

/// Errors surfaced while loading or validating `akubra.yaml`. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cluster \"{0}\" has an empty backend set")]
    EmptyBackendSet(String),

    #[error("cluster \"{0}\" has weight 0, weight must be >= 1")]
    ZeroWeight(String),

    #[error("client cluster list names unknown cluster \"{0}\"")]
    UnknownCluster(String),

    #[error("client declares no clusters and no default `Backends` were configured")]
    NoClusters,

    #[error("invalid backend URL \"{url}\"")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid `Listen` address \"{0}\"")]
    InvalidListenAddr(String),

    #[error("client \"{0}\" has ShardsCount 0, must be >= 1")]
    ZeroShardsCount(String),
}

/// A component-level error kind, distinguishable by the response selector and multi-transport
/// when classifying the outcome of a single backend dispatch.
#[derive(Error, Debug, Clone)]
pub enum AkubraError {
    /// A read did not produce a byte within the configured inactivity deadline.
    #[error("timeout waiting for backend response")]
    Timeout,

    /// The body delivered a different byte count than the declared `Content-Length`.
    #[error("body delivered {delivered} bytes, content-length declared {declared}")]
    BodyContentLengthMismatch { declared: u64, delivered: u64 },

    /// The backend was skipped this round because `ConnLimit` would be exceeded.
    #[error("backend throttled: in-flight connection ceiling reached")]
    Throttled,

    /// The consistent-hash ring has no cluster mapped for the chosen shard.
    #[error("no cluster mapped for shard \"{0}\"")]
    MissingShardMapping(String),

    /// The underlying HTTP client failed to dial or complete the request.
    #[error("backend request failed: {0}")]
    Transport(String),

    /// The client body's source reader failed with something other than EOF.
    #[error("client body read failed: {0}")]
    BodyRead(String),
}

impl AkubraError {
    /// Whether this error kind should be treated as a routing-level (500) error rather than
    /// a per-tuple transport failure. Only the missing-shard-mapping case qualifies.
    pub fn is_routing_error(&self) -> bool {
        matches!(self, AkubraError::MissingShardMapping(_))
    }
}

impl From<reqwest::Error> for AkubraError {
    fn from(err: reqwest::Error) -> Self {
        AkubraError::Transport(err.to_string())
    }
}

/// Converts an [`AkubraError`] into an `io::Error` so it can flow through `AsyncRead`
/// implementations (the body multiplexer and timeout reader both need this).
impl From<AkubraError> for std::io::Error {
    fn from(err: AkubraError) -> Self {
        std::io::Error::other(err)
    }
}

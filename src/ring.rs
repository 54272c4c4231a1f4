//! Shards Ring: picks which cluster-level transport handles a request, and drives the
//! regression-fallback chain when a cluster's response is unusable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};
use url::Url;

use crate::cluster::{Backend, Cluster};
use crate::config::Config;
use crate::errors::AkubraError;
use crate::selector::Selected;
use crate::shard::{hash_key, shard_id, weighted_shard_counts};
use crate::sync_log::{SyncLogRecord, SyncLogSender};
use crate::transport::{MultiTransport, OutboundRequest, RoundTripper};

/// `isBucketPath(p)`: the path trimmed of leading/trailing `/` contains no remaining `/`
/// separator.
pub fn is_bucket_path(path: &str) -> bool {
    let trimmed = path.trim_matches('/');
    !trimmed.is_empty() && !trimmed.contains('/')
}

enum Pick {
    AllClusters,
    Cluster(String),
}

pub struct Ring {
    client_name: String,
    /// Ring position (hash) → owning cluster name, in ascending-key order so a lookup walks
    /// forward from the hashed key to the first owning entry.
    hash_ring: BTreeMap<u64, String>,
    transports: HashMap<String, Arc<dyn RoundTripper>>,
    all_clusters: Arc<dyn RoundTripper>,
    /// cluster name → predecessor cluster name, derived from the client's declared order.
    regression: HashMap<String, String>,
    sync_log_methods: Arc<HashSet<Method>>,
    sync_log: SyncLogSender,
    read_timeout: Duration,
}

impl Ring {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        config: &Config,
        http_client: reqwest::Client,
        conn_limit: usize,
        dial_timeout: Duration,
        read_timeout: Duration,
        additional_request_headers: Arc<HeaderMap>,
        sync_log_methods: Arc<HashSet<Method>>,
        sync_log: SyncLogSender,
    ) -> Result<Self, AkubraError> {
        let clusters = Self::resolve_clusters(config);

        let counts = weighted_shard_counts(config.client.shards_count, &clusters);
        let mut hash_ring = BTreeMap::new();
        let mut next_index = 0u64;
        for cluster in &clusters {
            let count = counts.get(&cluster.name).copied().unwrap_or(0);
            for _ in 0..count {
                let id = shard_id(&config.client.name, next_index);
                hash_ring.insert(hash_key(&id), cluster.name.clone());
                next_index += 1;
            }
        }

        // One counter shared by every transport: the connection ceiling is process-wide,
        // not per-cluster, so every Multi-Transport instance must observe the same totals.
        let all_clusters_backends = Self::union_backends(&clusters);
        let counter = Arc::new(crate::connection_counter::ConnectionCounter::new(
            all_clusters_backends.iter().map(|b| b.url.clone()),
        ));

        let mut transports: HashMap<String, Arc<dyn RoundTripper>> = HashMap::new();
        for cluster in &clusters {
            let transport = MultiTransport::new(
                cluster.name.clone(),
                cluster.backends.clone(),
                http_client.clone(),
                counter.clone(),
                conn_limit,
                dial_timeout,
                read_timeout,
                additional_request_headers.clone(),
                sync_log_methods.clone(),
                sync_log.clone(),
            );
            transports.insert(cluster.name.clone(), Arc::new(transport));
        }

        let all_clusters: Arc<dyn RoundTripper> = Arc::new(MultiTransport::new(
            "all-clusters",
            Arc::new(all_clusters_backends),
            http_client,
            counter,
            conn_limit,
            dial_timeout,
            read_timeout,
            additional_request_headers,
            sync_log_methods.clone(),
            sync_log.clone(),
        ));

        let mut regression = HashMap::new();
        for window in clusters.windows(2) {
            regression.insert(window[1].name.clone(), window[0].name.clone());
        }

        Ok(Ring {
            client_name: config.client.name.clone(),
            hash_ring,
            transports,
            all_clusters,
            regression,
            sync_log_methods,
            sync_log,
            read_timeout,
        })
    }

    /// The client's declared cluster list, in order, with each name resolved against the
    /// configuration's cluster map. When the client declares no clusters, a single synthetic
    /// cluster named after the client is built from the top-level `Backends` list.
    fn resolve_clusters(config: &Config) -> Vec<Cluster> {
        if config.client.clusters.is_empty() {
            let backends = config
                .backends
                .iter()
                .cloned()
                .map(|url| backend_for(&config.maintained_backend, url))
                .collect();
            return vec![Cluster::new(config.client.name.clone(), 1, backends)];
        }

        config
            .client
            .clusters
            .iter()
            .filter_map(|name| {
                let cluster_config = config.clusters.get(name)?;
                let backends = cluster_config
                    .backends
                    .iter()
                    .cloned()
                    .map(|url| backend_for(&config.maintained_backend, url))
                    .collect();
                Some(Cluster::new(name.clone(), cluster_config.weight, backends))
            })
            .collect()
    }

    fn union_backends(clusters: &[Cluster]) -> Vec<Backend> {
        let mut seen = HashSet::new();
        let mut union = Vec::new();
        for cluster in clusters {
            for backend in cluster.backends.iter() {
                if seen.insert(backend.url.clone()) {
                    union.push(backend.clone());
                }
            }
        }
        union
    }

    /// Picks which transport a key-routed request should land on: `AllClusters` for DELETE
    /// and bucket-path requests, otherwise the cluster owning the hashed path's shard.
    fn pick(&self, method: &Method, path: &str) -> Pick {
        if method == Method::DELETE || is_bucket_path(path) {
            return Pick::AllClusters;
        }

        let cluster = self
            .hash_ring
            .range(hash_key(path)..)
            .next()
            .or_else(|| self.hash_ring.iter().next())
            .map(|(_, name)| name.clone());

        match cluster {
            Some(name) => Pick::Cluster(name),
            None => Pick::AllClusters,
        }
    }

    /// Dispatches `request`, following the regression chain on failure, and returns the
    /// final chosen tuple plus the name of the cluster that produced it (for logging).
    pub async fn dispatch(
        &self,
        request: OutboundRequest,
    ) -> Result<(Selected, String), AkubraError> {
        let path = request.path_and_query.split('?').next().unwrap_or("");

        match self.pick(&request.method, path) {
            Pick::AllClusters => {
                let selected = self.all_clusters.round_trip(request).await;
                Ok((selected, "all-clusters".to_string()))
            }
            Pick::Cluster(cluster_name) => {
                self.dispatch_with_regression(request, cluster_name).await
            }
        }
    }

    async fn dispatch_with_regression(
        &self,
        request: OutboundRequest,
        mut cluster_name: String,
    ) -> Result<(Selected, String), AkubraError> {
        let path = request.path_and_query.split('?').next().unwrap_or("").to_string();

        loop {
            let transport = self
                .transports
                .get(&cluster_name)
                .ok_or_else(|| AkubraError::MissingShardMapping(cluster_name.clone()))?
                .clone();

            let selected = transport.round_trip(request.clone()).await;

            if !needs_regression(&selected) {
                return Ok((selected, cluster_name));
            }

            match self.regression.get(&cluster_name).cloned() {
                Some(predecessor) => {
                    tracing::debug!(
                        from = %cluster_name,
                        to = %predecessor,
                        "regressing to predecessor cluster"
                    );
                    if self.sync_log_methods.contains(&request.method) {
                        record_regression(
                            &self.sync_log,
                            &request.method,
                            &path,
                            &cluster_name,
                            &status_or_error(&selected),
                            &predecessor,
                        );
                    }
                    drain_abandoned(selected, self.read_timeout).await;
                    cluster_name = predecessor;
                }
                None => return Ok((selected, cluster_name)),
            }
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

fn backend_for(maintained: &Option<Url>, url: Url) -> Backend {
    match maintained {
        Some(m) if *m == url => Backend::maintained(url),
        _ => Backend::new(url),
    }
}

/// Whether a chosen tuple should trigger a regression retry: a transport error, or a status
/// strictly greater than 400. (A bare 400 is not itself a regression trigger, even though it
/// also fails the response selector's own "< 400 satisfies" candidate test.)
fn needs_regression(selected: &Selected) -> bool {
    match selected {
        Selected::Error { .. } => true,
        Selected::Response { response, .. } => response.status().as_u16() > 400,
    }
}

fn status_or_error(selected: &Selected) -> String {
    match selected {
        Selected::Response { response, .. } => response.status().as_str().to_string(),
        Selected::Error { error, .. } => error.to_string(),
    }
}

/// Drains a response body abandoned by a regression retry so the connection returns to the
/// pool instead of being held open by a value nobody reads from again. Subject to the same
/// inactivity deadline as any other backend body: an abandoned cluster that stalls mid-body
/// must not hold its connection open past `read_timeout`.
async fn drain_abandoned(selected: Selected, read_timeout: Duration) {
    if let Selected::Response { response, .. } = selected {
        use futures::StreamExt;
        let mut body = crate::transport::timeout_body(response, read_timeout);
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                break;
            }
        }
    }
}

/// Records a sync-log entry naming the cluster a regression chain abandoned, independent of
/// the per-backend divergence records the response selector already emits.
pub fn record_regression(
    sync_log: &SyncLogSender,
    method: &Method,
    path: &str,
    abandoned_cluster: &str,
    outcome: &str,
    chosen_cluster: &str,
) {
    sync_log.record(SyncLogRecord {
        timestamp: chrono::Utc::now(),
        method: method.to_string(),
        path: path.to_string(),
        cluster: abandoned_cluster.to_string(),
        backend: String::new(),
        status_or_error: outcome.to_string(),
        chosen_backend: chosen_cluster.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_path_detection() {
        assert!(is_bucket_path("/index"));
        assert!(is_bucket_path("index/"));
        assert!(!is_bucket_path("/index/a"));
        assert!(!is_bucket_path("/"));
        assert!(!is_bucket_path(""));
    }
}

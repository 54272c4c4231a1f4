//! Multi-backend outbound transport: one trait, held by the ring only as `Arc<dyn
//! RoundTripper>`, grounded on `network-proxy::interface::NetworkProxy`'s `#[async_trait]` +
//! trait-object pattern. A single-backend cluster is simply a [`MultiTransport`] whose
//! backend set has one element — there is no separate degenerate implementation, since
//! multi-backend fan-out already generalizes it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, Method};
use url::Url;

use crate::body_multiplexer::{multiplex, MultiplexOutcome};
use crate::cluster::Backend;
use crate::connection_counter::{ConnectionCounter, InFlightGuard};
use crate::errors::AkubraError;
use crate::selector::{self, DispatchOutcome, DispatchResult, Selected};
use crate::sync_log::SyncLogSender;
use crate::timeout_reader::TimeoutStream;

/// An outbound S3 request, already stripped of any backend-specific detail. The same
/// `OutboundRequest` is replayed against however many backends a [`RoundTripper`] fronts,
/// and — since a ring regression may retry it against an entirely different cluster after
/// the first attempt has already streamed it once — against however many clusters a
/// regression chain visits. The body is therefore a plain, clonable `Bytes` buffer rather
/// than a one-shot stream: it is read from the client exactly once, up front, and every
/// cluster attempt re-enters the body multiplexer from that buffer.
pub struct OutboundRequest {
    pub method: Method,
    /// Path plus query string, e.g. `/bucket/key?partNumber=2`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Option<Bytes>,
}

impl Clone for OutboundRequest {
    fn clone(&self) -> Self {
        OutboundRequest {
            method: self.method.clone(),
            path_and_query: self.path_and_query.clone(),
            headers: self.headers.clone(),
            content_length: self.content_length,
            body: self.body.clone(),
        }
    }
}

/// One interface, variants realised as differently-configured instances rather than
/// separate types: a per-cluster fan-out and the all-clusters fan-out are both
/// `MultiTransport`s, just over different backend sets.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, request: OutboundRequest) -> Selected;
}

pub struct MultiTransport {
    pub cluster_name: String,
    pub backends: Arc<Vec<Backend>>,
    client: reqwest::Client,
    counter: Arc<ConnectionCounter>,
    conn_limit: usize,
    dial_timeout: Duration,
    read_timeout: Duration,
    additional_request_headers: Arc<HeaderMap>,
    sync_log_methods: Arc<HashSet<Method>>,
    sync_log: SyncLogSender,
}

impl MultiTransport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cluster_name: impl Into<String>,
        backends: Arc<Vec<Backend>>,
        client: reqwest::Client,
        counter: Arc<ConnectionCounter>,
        conn_limit: usize,
        dial_timeout: Duration,
        read_timeout: Duration,
        additional_request_headers: Arc<HeaderMap>,
        sync_log_methods: Arc<HashSet<Method>>,
        sync_log: SyncLogSender,
    ) -> Self {
        MultiTransport {
            cluster_name: cluster_name.into(),
            backends,
            client,
            counter,
            conn_limit,
            dial_timeout,
            read_timeout,
            additional_request_headers,
            sync_log_methods,
            sync_log,
        }
    }

    /// Evicts the busiest candidate, one at a time, until dispatching the remainder would
    /// no longer exceed `ConnLimit`. A per-request decision; no persistent quarantine.
    fn apply_connection_ceiling(&self, mut candidates: Vec<Backend>) -> (Vec<Backend>, Vec<Url>) {
        let mut evicted = Vec::new();
        while !candidates.is_empty()
            && self.counter.total() as usize + candidates.len() > self.conn_limit
        {
            let urls: Vec<Url> = candidates.iter().map(|b| b.url.clone()).collect();
            let Some(busiest) = self.counter.busiest(urls.iter()).cloned() else {
                break;
            };
            candidates.retain(|b| b.url != busiest);
            evicted.push(busiest);
        }
        (candidates, evicted)
    }
}

#[async_trait]
impl RoundTripper for MultiTransport {
    async fn round_trip(&self, request: OutboundRequest) -> Selected {
        let routable: Vec<Backend> = self
            .backends
            .iter()
            .filter(|b| !b.maintained)
            .cloned()
            .collect();

        let (candidates, evicted) = self.apply_connection_ceiling(routable);

        if candidates.is_empty() {
            return Selected::Error {
                backend: self
                    .backends
                    .first()
                    .map(|b| b.url.clone())
                    .unwrap_or_else(|| Url::parse("akubra://no-backends").unwrap()),
                error: AkubraError::Throttled,
            };
        }

        let source: std::pin::Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> =
            match request.body.clone() {
                Some(bytes) => Box::pin(futures::stream::once(futures::future::ready(Ok(bytes)))),
                None => Box::pin(futures::stream::empty()),
            };
        let (readers, drive) = multiplex(source, candidates.len(), request.content_length);
        tokio::spawn(async move {
            let outcome = drive.await;
            if outcome != MultiplexOutcome::Completed {
                tracing::debug!(?outcome, "body fan-out did not complete cleanly");
            }
        });

        let (tx, rx) = tokio::sync::mpsc::channel(candidates.len().max(1));

        for backend in &evicted {
            let _ = tx
                .send(DispatchResult {
                    backend: backend.clone(),
                    outcome: DispatchOutcome::Error(AkubraError::Throttled),
                })
                .await;
            tracing::warn!(backend = %backend, "evicted backend: connection ceiling reached");
            metrics::counter!("akubra_throttled_evictions").increment(1);
        }

        for (backend, reader) in candidates.into_iter().zip(readers.into_iter()) {
            let client = self.client.clone();
            let counter = self.counter.clone();
            let method = request.method.clone();
            let path = request.path_and_query.clone();
            let mut headers = request.headers.clone();
            headers.extend(self.additional_request_headers.as_ref().clone());
            let dial_timeout = self.dial_timeout;
            let tx = tx.clone();

            tokio::spawn(async move {
                let url = match backend.url.join(&path) {
                    Ok(u) => u,
                    Err(err) => {
                        let _ = tx
                            .send(DispatchResult {
                                backend: backend.url.clone(),
                                outcome: DispatchOutcome::Error(AkubraError::Transport(
                                    err.to_string(),
                                )),
                            })
                            .await;
                        return;
                    }
                };

                let _guard = InFlightGuard::acquire(&counter, backend.url.clone());
                metrics::counter!("akubra_backend_dispatches", "backend" => backend.url.to_string()).increment(1);

                // The Host header always reflects the backend actually dialled, never the
                // client-facing host the inbound request carried.
                if let Some(host) = url.host_str() {
                    let host_value = match url.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host.to_string(),
                    };
                    if let Ok(value) = http::HeaderValue::from_str(&host_value) {
                        headers.insert(http::header::HOST, value);
                    }
                }

                let body = reqwest::Body::wrap_stream(reader);
                let send_fut = client.request(method, url).headers(headers).body(body).send();

                let outcome = match tokio::time::timeout(dial_timeout, send_fut).await {
                    Err(_) => DispatchOutcome::Error(AkubraError::Timeout),
                    Ok(Err(err)) => DispatchOutcome::Error(err.into()),
                    Ok(Ok(response)) => DispatchOutcome::Response(response),
                };

                let _ = tx
                    .send(DispatchResult {
                        backend: backend.url.clone(),
                        outcome,
                    })
                    .await;
            });
        }
        drop(tx);

        selector::select(
            rx,
            request.method,
            request.path_and_query,
            self.cluster_name.clone(),
            self.sync_log_methods.clone(),
            self.sync_log.clone(),
            self.read_timeout,
        )
        .await
        .unwrap_or(Selected::Error {
            backend: Url::parse("akubra://no-dispatches").unwrap(),
            error: AkubraError::Throttled,
        })
    }
}

/// Applies the read-inactivity deadline to a backend response body, producing the byte
/// stream that is ultimately forwarded to the client. `reqwest::Response` itself can't be
/// rebuilt with a different body, so every consumer of a dispatched response — the
/// selector's background drain of non-candidate tuples, the ring's drain of an abandoned
/// regression attempt, and the client-facing stream in `proxy::render` — wraps it through
/// this function rather than reading `.chunk()`/`.bytes_stream()` directly.
pub fn timeout_body(
    response: reqwest::Response,
    read_timeout: Duration,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    TimeoutStream::new(response.bytes_stream(), read_timeout)
}

//! Reduces a stream of per-backend result tuples to a single chosen tuple under the default
//! policy: the first tuple with a usable response (status < 400, no transport error) wins;
//! if none qualifies, the first tuple received wins. Every non-candidate tuple is drained
//! and, when its method is configured for sync logging and it failed, recorded as a
//! divergence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::Method;
use url::Url;

use crate::errors::AkubraError;
use crate::sync_log::{SyncLogRecord, SyncLogSender};
use crate::transport::timeout_body;

pub enum DispatchOutcome {
    Response(reqwest::Response),
    Error(AkubraError),
}

/// One backend's request-response-or-error result.
pub struct DispatchResult {
    pub backend: Url,
    pub outcome: DispatchOutcome,
}

impl DispatchResult {
    fn is_satisfying(&self) -> bool {
        matches!(&self.outcome, DispatchOutcome::Response(r) if r.status().as_u16() < 400)
    }

    fn is_failure(&self) -> bool {
        match &self.outcome {
            DispatchOutcome::Response(r) => r.status().as_u16() >= 400,
            DispatchOutcome::Error(_) => true,
        }
    }

    fn status_or_error(&self) -> String {
        match &self.outcome {
            DispatchOutcome::Response(r) => r.status().as_str().to_string(),
            DispatchOutcome::Error(e) => e.to_string(),
        }
    }
}

/// The selector's decision: either a response to stream back to the client, or an opaque
/// transport error when every tuple in the round failed to even produce a response.
pub enum Selected {
    Response {
        backend: Url,
        response: reqwest::Response,
    },
    Error {
        backend: Url,
        error: AkubraError,
    },
}

/// Drains a non-candidate tuple's body to completion so the underlying connection can be
/// returned to the pool. Subject to the same inactivity deadline as the body that is
/// actually streamed back to the client — a straggling backend being drained in the
/// background must not hold its connection open indefinitely.
async fn drain(result: DispatchResult, read_timeout: Duration) {
    if let DispatchOutcome::Response(response) = result.outcome {
        let mut body = timeout_body(response, read_timeout);
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                break;
            }
        }
    }
}

fn maybe_record_divergence(
    result: &DispatchResult,
    method: &Method,
    path: &str,
    chosen_backend: &Url,
    cluster: &str,
    sync_log_methods: &HashSet<Method>,
    sync_log: &SyncLogSender,
) {
    if result.is_failure() && sync_log_methods.contains(method) {
        sync_log.record(SyncLogRecord {
            timestamp: chrono::Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            cluster: cluster.to_string(),
            backend: result.backend.to_string(),
            status_or_error: result.status_or_error(),
            chosen_backend: chosen_backend.to_string(),
        });
    }
}

/// Consumes `rx` under the default selection policy, returning as soon as a decision can be
/// made. Any dispatches still outstanding when a decision is reached keep draining in a
/// spawned background task, so a straggling backend cannot hold up the client response.
#[allow(clippy::too_many_arguments)]
pub async fn select(
    mut rx: tokio::sync::mpsc::Receiver<DispatchResult>,
    method: Method,
    path: String,
    cluster: String,
    sync_log_methods: Arc<HashSet<Method>>,
    sync_log: SyncLogSender,
    read_timeout: Duration,
) -> Option<Selected> {
    let mut reserved: Option<DispatchResult> = None;

    let candidate = loop {
        let Some(result) = rx.recv().await else {
            break None;
        };

        if result.is_satisfying() {
            if let Some(non_candidate) = reserved.take() {
                maybe_record_divergence(
                    &non_candidate,
                    &method,
                    &path,
                    &result.backend,
                    &cluster,
                    &sync_log_methods,
                    &sync_log,
                );
                drain(non_candidate, read_timeout).await;
            }
            break Some(result);
        }

        if reserved.is_none() {
            reserved = Some(result);
        } else {
            maybe_record_divergence(
                &result,
                &method,
                &path,
                &reserved.as_ref().unwrap().backend,
                &cluster,
                &sync_log_methods,
                &sync_log,
            );
            drain(result, read_timeout).await;
        }
    };

    let candidate = candidate.or(reserved)?;

    let chosen_backend = candidate.backend.clone();
    tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            maybe_record_divergence(
                &result,
                &method,
                &path,
                &chosen_backend,
                &cluster,
                &sync_log_methods,
                &sync_log,
            );
            drain(result, read_timeout).await;
        }
    });

    Some(match candidate.outcome {
        DispatchOutcome::Response(response) => Selected::Response {
            backend: candidate.backend,
            response,
        },
        DispatchOutcome::Error(error) => Selected::Error {
            backend: candidate.backend,
            error,
        },
    })
}

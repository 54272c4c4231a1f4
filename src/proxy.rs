//! Inbound HTTP surface: a catch-all handler that accepts arbitrary S3 methods and paths,
//! hands them to the [`Ring`], and streams the chosen backend response back to the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};

use crate::errors::AkubraError;
use crate::ring::Ring;
use crate::selector::Selected;
use crate::transport::{self, OutboundRequest};

/// Caps how large an inbound body this proxy will buffer in memory before dispatch. Large
/// object uploads beyond this limit are rejected rather than silently truncated; operators
/// fronting bulk object storage should size this to their workload.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ring: Arc<Ring>,
    pub additional_response_headers: Arc<HeaderMap>,
    pub read_timeout: Duration,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .fallback(handle)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let headers = req.headers().clone();
    let content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let (_, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
                .into_response()
        }
    };

    let outbound = OutboundRequest {
        method: method.clone(),
        path_and_query: path_and_query.clone(),
        headers,
        content_length,
        body: if body.is_empty() { None } else { Some(body) },
    };

    let path = path_and_query.split('?').next().unwrap_or("").to_string();

    match state.ring.dispatch(outbound).await {
        Ok((selected, chosen_cluster)) => {
            // The backend URL lives on `selected` itself; peek it before `render` consumes
            // the value, falling back to the cluster name when the round trip produced no
            // usable backend response at all.
            let chosen_backend = match &selected {
                Selected::Response { backend, .. } => backend.to_string(),
                Selected::Error { .. } => chosen_cluster,
            };
            let response = render(selected, &state.additional_response_headers, state.read_timeout);
            let status = response
                .as_ref()
                .map(|r| r.status())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            crate::access_log::record(&method, &path, &chosen_backend, status, start.elapsed());
            response.unwrap_or_else(|err| {
                (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
            })
        }
        Err(err) if err.is_routing_error() => {
            tracing::error!(error = %err, "routing error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "dispatch failed");
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}

fn render(
    selected: Selected,
    additional_response_headers: &HeaderMap,
    read_timeout: Duration,
) -> Result<Response, AkubraError> {
    match selected {
        Selected::Response { response, .. } => {
            let status = response.status();
            let mut headers = response.headers().clone();
            let body_stream = transport::timeout_body(response, read_timeout);

            let mut builder = Response::builder().status(status);
            headers.extend(additional_response_headers.clone());
            for (name, value) in headers.iter() {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from_stream(body_stream))
                .map_err(|err| AkubraError::Transport(err.to_string()))
        }
        Selected::Error { error, .. } => Err(error),
    }
}

//! HTTP ingestion endpoint for OTLP trace payloads.
//!
//! Accepts `POST /v1/traces` in either protobuf or JSON encoding, decodes the
//! payload, and appends the resource-span groups to the shared [`SpanBuffer`].
//! The endpoint stays responsive for the lifetime of the process, independent
//! of flush activity; flushes are never triggered from here.

use crate::buffer::SpanBuffer;
use crate::codec;
use crate::config::ReceiverConfig;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// OTLP/HTTP trace receiver.
pub struct TraceReceiver {
    config: ReceiverConfig,
    buffer: Arc<SpanBuffer>,
    cancel_token: CancellationToken,
}

impl TraceReceiver {
    /// Creates a new receiver that appends decoded groups to `buffer`.
    pub fn new(
        config: ReceiverConfig,
        buffer: Arc<SpanBuffer>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            buffer,
            cancel_token,
        }
    }

    /// Binds the listener and returns a handle plus the server future.
    ///
    /// The future must be spawned to serve requests; it completes when the
    /// cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind.
    pub async fn start(
        self,
    ) -> Result<
        (
            ReceiverHandle,
            std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
        ),
        std::io::Error,
    > {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.listen_port));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ReceiverState {
            buffer: self.buffer,
            groups_received: AtomicU64::new(0),
        });
        let handle = ReceiverHandle {
            state: Arc::clone(&state),
            local_addr,
        };

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/v1/traces", post(handle_traces))
            .with_state(state);

        tracing::info!(port = local_addr.port(), "trace receiver started");

        let cancel_token = self.cancel_token;
        let future = Box::pin(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(cancel_token.cancelled_owned())
                .await;
        });

        Ok((handle, future))
    }
}

/// Handle for inspecting a running receiver.
#[derive(Clone)]
pub struct ReceiverHandle {
    state: Arc<ReceiverState>,
    local_addr: SocketAddr,
}

impl ReceiverHandle {
    /// Returns the actual bound address, useful when port 0 was configured.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the port the receiver is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the base URL of the receiver.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_addr.port())
    }

    /// Returns the number of resource-span groups accepted so far.
    pub fn groups_received(&self) -> u64 {
        self.state.groups_received.load(Ordering::Relaxed)
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Receiver status, always `"ready"` once the listener is up.
    pub status: &'static str,
    /// Number of resource-span groups accepted so far.
    pub groups_received: u64,
}

struct ReceiverState {
    buffer: Arc<SpanBuffer>,
    groups_received: AtomicU64,
}

async fn handle_health(State(state): State<Arc<ReceiverState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        groups_received: state.groups_received.load(Ordering::Relaxed),
    })
}

async fn handle_traces(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let units = match codec::decode_trace_request(content_type, &body) {
        Ok(units) => units,
        Err(e) => {
            tracing::warn!(error = %e, content_type, "rejected trace payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let count = units.len() as u64;
    if let Err(e) = state.buffer.append(units) {
        // The sender owns any retry; no backpressure delay here.
        tracing::warn!(error = %e, "rejected trace payload, buffer at capacity");
        return StatusCode::BAD_REQUEST;
    }

    state.groups_received.fetch_add(count, Ordering::Relaxed);
    tracing::debug!(
        groups = count,
        buffered = state.buffer.len(),
        "buffered resource spans"
    );

    StatusCode::OK
}

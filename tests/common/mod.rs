//! Shared fixtures for integration tests: a mock OTLP collector, a mock
//! Extensions API host, and event-driven readiness waiting instead of
//! arbitrary sleeps.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Polls the receiver health endpoint until it responds successfully.
pub async fn wait_for_http_ready(port: u16, timeout: Duration) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    let url = format!("http://127.0.0.1:{}/health", port);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .map_err(|e| format!("failed to create HTTP client: {}", e))?;

    while Instant::now() < deadline {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }

    Err(format!(
        "HTTP server health check timed out after {:?} on port {}",
        timeout, port
    ))
}

/// Builds an export request with one resource-span group per name.
pub fn trace_request(names: &[&str]) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: names
            .iter()
            .map(|name| ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        name: name.to_string(),
                        trace_id: vec![1; 16],
                        span_id: vec![1; 8],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .collect(),
    }
}

/// Extracts span names from an export request, one per group.
pub fn span_names(request: &ExportTraceServiceRequest) -> Vec<String> {
    request
        .resource_spans
        .iter()
        .map(|group| group.scope_spans[0].spans[0].name.clone())
        .collect()
}

/// Milliseconds since the Unix epoch, as the Extensions API reports deadlines.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// The wire shape of an INVOKE event as the host delivers it.
pub fn invoke_event(deadline_ms: i64) -> serde_json::Value {
    json!({
        "eventType": "INVOKE",
        "deadlineMs": deadline_ms,
        "requestId": "8286a188-ba5c-4a25-a7ae-e5e1b6e376aa",
        "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:test",
        "tracing": {
            "type": "X-Amzn-Trace-Id",
            "value": "Root=1-5f35ae12-0c0fec141ab77a00bc047aa2;Sampled=1"
        }
    })
}

/// The wire shape of a SHUTDOWN event as the host delivers it.
pub fn shutdown_event(deadline_ms: i64) -> serde_json::Value {
    json!({
        "eventType": "SHUTDOWN",
        "shutdownReason": "spindown",
        "deadlineMs": deadline_ms
    })
}

#[derive(Clone)]
struct CollectorState {
    tx: mpsc::UnboundedSender<(HeaderMap, Bytes)>,
    status: StatusCode,
    delay: Duration,
}

async fn collector_handler(
    State(state): State<CollectorState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // Capture before delaying: a client that gives up on a slow response
    // closes the connection, which cancels this handler mid-sleep; the
    // request must still be recorded.
    let _ = state.tx.send((headers, body));
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.status
}

/// Starts a mock OTLP collector answering `POST /v1/traces` with `status`
/// after `delay`, capturing every request.
///
/// Returns the full endpoint URL and the capture channel.
pub async fn start_mock_collector(
    status: StatusCode,
    delay: Duration,
) -> (String, mpsc::UnboundedReceiver<(HeaderMap, Bytes)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/v1/traces", post(collector_handler))
        .with_state(CollectorState { tx, status, delay });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}/v1/traces", addr), rx)
}

/// Mock Extensions API host.
pub struct MockHost {
    /// Base URL of the host, to use as `lifecycle.runtime_api`.
    pub url: String,
    /// Sender delivering lifecycle events to long-polling clients.
    pub events: mpsc::UnboundedSender<serde_json::Value>,
    /// Observed interactions.
    pub state: Arc<MockHostState>,
}

/// Observed interactions with the mock Extensions API host.
pub struct MockHostState {
    /// Identifier issued on registration.
    pub extension_id: String,
    /// Number of registration calls received.
    pub register_calls: AtomicU64,
    /// Number of `/event/next` polls received.
    pub poll_calls: AtomicU64,
    /// Last `Lambda-Extension-Name` header value seen at registration.
    pub registered_name: Mutex<Option<String>>,
    /// Last registration body received.
    pub register_body: Mutex<Option<serde_json::Value>>,
    /// `Lambda-Extension-Identifier` header values seen on polls.
    pub poll_identifiers: Mutex<Vec<String>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<serde_json::Value>>,
}

async fn register_handler(
    State(state): State<Arc<MockHostState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.register_calls.fetch_add(1, Ordering::SeqCst);
    *state.registered_name.lock().unwrap() = headers
        .get("Lambda-Extension-Name")
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    *state.register_body.lock().unwrap() = Some(body);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        "Lambda-Extension-Identifier",
        HeaderValue::from_str(&state.extension_id).unwrap(),
    );

    (
        StatusCode::OK,
        response_headers,
        Json(json!({
            "functionName": "test-function",
            "functionVersion": "$LATEST",
            "handler": "handler.test"
        })),
    )
}

async fn next_handler(State(state): State<Arc<MockHostState>>, headers: HeaderMap) -> Response {
    state.poll_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(id) = headers
        .get("Lambda-Extension-Identifier")
        .and_then(|value| value.to_str().ok())
    {
        state.poll_identifiers.lock().unwrap().push(id.to_string());
    }

    // Long poll: block until the test delivers the next event.
    let event = state.events_rx.lock().await.recv().await;
    match event {
        Some(event) => Json(event).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Starts a mock Extensions API host implementing register and long-poll
/// next-event endpoints.
pub async fn start_mock_host() -> MockHost {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(MockHostState {
        extension_id: "mock-extension-id".to_string(),
        register_calls: AtomicU64::new(0),
        poll_calls: AtomicU64::new(0),
        registered_name: Mutex::new(None),
        register_body: Mutex::new(None),
        poll_identifiers: Mutex::new(Vec::new()),
        events_rx: tokio::sync::Mutex::new(rx),
    });

    let app = Router::new()
        .route("/2020-01-01/extension/register", post(register_handler))
        .route("/2020-01-01/extension/event/next", get(next_handler))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockHost {
        url: format!("http://{}", addr),
        events: tx,
        state,
    }
}

//! Lambda Extensions API client.
//!
//! Implements the client side of the Extensions API as documented at:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-extensions-api.html>
//!
//! The process registers once at startup, receives an identifier, and then
//! long-polls `/event/next` with that identifier for the lifetime of the
//! process.

use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2020-01-01";
const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";

/// Lifecycle events an extension can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// A new invocation has started.
    Invoke,
    /// The execution environment is shutting down.
    Shutdown,
}

/// A lifecycle event delivered by the host, consumed exactly once per poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum LifecycleEvent {
    /// Invocation event.
    #[serde(rename = "INVOKE")]
    Invoke {
        /// Invocation deadline as milliseconds since the Unix epoch.
        #[serde(rename = "deadlineMs")]
        deadline_ms: i64,

        /// Request ID for this invocation.
        #[serde(rename = "requestId")]
        request_id: String,

        /// ARN of the invoked function.
        #[serde(rename = "invokedFunctionArn", default)]
        invoked_function_arn: String,

        /// X-Ray tracing context.
        #[serde(default)]
        tracing: Option<TracingInfo>,
    },

    /// Shutdown event. The host forcibly terminates the process at the
    /// deadline.
    #[serde(rename = "SHUTDOWN")]
    Shutdown {
        /// Termination deadline as milliseconds since the Unix epoch.
        #[serde(rename = "deadlineMs")]
        deadline_ms: i64,

        /// Reason reported by the host (`spindown`, `timeout`, `failure`).
        #[serde(rename = "shutdownReason", default)]
        shutdown_reason: Option<String>,
    },
}

impl LifecycleEvent {
    /// Returns the event's deadline as milliseconds since the Unix epoch.
    pub fn deadline_ms(&self) -> i64 {
        match self {
            LifecycleEvent::Invoke { deadline_ms, .. }
            | LifecycleEvent::Shutdown { deadline_ms, .. } => *deadline_ms,
        }
    }
}

/// X-Ray tracing context attached to invoke events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingInfo {
    /// Trace header type (always `X-Amzn-Trace-Id` on AWS).
    #[serde(rename = "type")]
    pub trace_type: String,

    /// The trace header value.
    pub value: String,
}

/// Function metadata returned by a successful registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Name of the hosting function.
    #[serde(default)]
    pub function_name: String,
    /// Version of the hosting function.
    #[serde(default)]
    pub function_version: String,
    /// Configured handler of the hosting function.
    #[serde(default)]
    pub handler: String,
}

#[derive(Debug, Serialize)]
struct RegisterRequest {
    events: Vec<EventType>,
}

/// Errors from the Extensions API client.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The request failed or the response body could not be read.
    #[error("extensions api request failed")]
    Http(#[from] reqwest::Error),

    /// The host answered with a non-success status.
    #[error("extensions api returned {0}")]
    Status(reqwest::StatusCode),

    /// Registration succeeded but no identifier header was returned.
    #[error("register response missing Lambda-Extension-Identifier header")]
    MissingIdentifier,

    /// `next_event` was called before a successful `register`.
    #[error("next_event called before register")]
    NotRegistered,
}

/// Client for the host's Extensions API.
pub struct ExtensionClient {
    client: Client,
    base_url: String,
    name: String,
    extension_id: Option<String>,
}

impl ExtensionClient {
    /// Creates a client for the Extensions API at `runtime_api`.
    ///
    /// `runtime_api` is a `host:port` pair (the `AWS_LAMBDA_RUNTIME_API`
    /// form) or a full URL; `name` is announced at registration.
    pub fn new(runtime_api: &str, name: impl Into<String>) -> Self {
        let authority = runtime_api.trim_end_matches('/');
        let base_url = if authority.starts_with("http://") || authority.starts_with("https://") {
            format!("{authority}/{API_VERSION}/extension")
        } else {
            format!("http://{authority}/{API_VERSION}/extension")
        };

        Self {
            // No client-level timeout: /event/next blocks until the host has
            // an event, which can be arbitrarily long.
            client: Client::new(),
            base_url,
            name: name.into(),
            extension_id: None,
        }
    }

    /// Returns the identifier issued at registration, if any.
    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    /// Registers this process with the host, subscribing to `INVOKE` and
    /// `SHUTDOWN` events.
    ///
    /// The identifier from the response header is retained and attached to
    /// every subsequent poll.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal to the caller: without an identifier the
    /// process cannot poll for events.
    pub async fn register(&mut self) -> Result<RegisterResponse, LifecycleError> {
        let response = self
            .client
            .post(format!("{}/register", self.base_url))
            .header(EXTENSION_NAME_HEADER, &self.name)
            .json(&RegisterRequest {
                events: vec![EventType::Invoke, EventType::Shutdown],
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LifecycleError::Status(response.status()));
        }

        let extension_id = response
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(LifecycleError::MissingIdentifier)?;

        let metadata = response.json::<RegisterResponse>().await?;
        self.extension_id = Some(extension_id);

        Ok(metadata)
    }

    /// Long-polls the host for the next lifecycle event.
    ///
    /// Blocks until the host delivers an event. Cancellation is observed by
    /// dropping the returned future, which aborts the in-flight request.
    ///
    /// # Errors
    ///
    /// Transient failures (transport errors, non-success statuses, malformed
    /// bodies) are reported to the caller, which is expected to log and
    /// re-poll.
    pub async fn next_event(&self) -> Result<LifecycleEvent, LifecycleError> {
        let extension_id = self
            .extension_id
            .as_deref()
            .ok_or(LifecycleError::NotRegistered)?;

        let response = self
            .client
            .get(format!("{}/event/next", self.base_url))
            .header(EXTENSION_ID_HEADER, extension_id)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LifecycleError::Status(response.status()));
        }

        Ok(response.json().await?)
    }
}

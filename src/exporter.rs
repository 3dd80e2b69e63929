//! Export of drained span batches to the configured destination.
//!
//! Egress is always binary protobuf, regardless of how the spans were
//! ingested. One POST per flush, bound to the caller's time budget; there is
//! no internal retry, so a failed flush cycle loses its batch.

use crate::config::ExporterConfig;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::Message;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;

const EXPORT_CONTENT_TYPE: &str = "application/x-protobuf";

/// Error during export.
///
/// A response from the destination, whatever its status, is not an error:
/// [`ExportClient::send`] fails only when the request could not be sent or no
/// response arrived within the budget.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No response arrived before the flush budget expired.
    #[error("export request deadline expired")]
    DeadlineExceeded(#[source] reqwest::Error),

    /// The request could not be sent.
    #[error("export request failed")]
    Http(#[from] reqwest::Error),

    /// No destination endpoint was configured.
    #[error("no destination endpoint configured")]
    NoEndpoint,
}

/// Client for POSTing span batches to the configured OTLP destination.
#[derive(Debug)]
pub struct ExportClient {
    client: Client,
    endpoint: String,
    headers: HashMap<String, String>,
}

impl ExportClient {
    /// Creates an export client from the exporter configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoEndpoint`] when no destination is configured,
    /// or [`SendError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ExporterConfig) -> Result<Self, SendError> {
        let endpoint = config.endpoint.clone().ok_or(SendError::NoEndpoint)?;
        let client = Client::builder().build().map_err(SendError::Http)?;

        Ok(Self {
            client,
            endpoint,
            headers: config.headers.clone(),
        })
    }

    /// Serialises the given groups into a single export request and POSTs it,
    /// bound to `budget`.
    ///
    /// Returns the remote status for any response received, including non-2xx
    /// statuses; those are the caller's to log, not hard failures.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::DeadlineExceeded`] when the budget expires before
    /// a response, or [`SendError::Http`] on a transport failure.
    pub async fn send(
        &self,
        budget: Duration,
        units: Vec<ResourceSpans>,
    ) -> Result<StatusCode, SendError> {
        let request = ExportTraceServiceRequest {
            resource_spans: units,
        };
        let body = request.encode_to_vec();

        let mut post = self
            .client
            .post(&self.endpoint)
            .timeout(budget)
            .header(CONTENT_TYPE, EXPORT_CONTENT_TYPE)
            .body(body);

        for (key, value) in &self.headers {
            post = post.header(key, value);
        }

        let response = post.send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::DeadlineExceeded(e)
            } else {
                SendError::Http(e)
            }
        })?;

        Ok(response.status())
    }

    /// Returns the configured destination URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

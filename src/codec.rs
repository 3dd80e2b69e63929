//! Decoding of inbound OTLP trace export payloads.
//!
//! Pure format conversion, isolated from the buffer and from the egress
//! encoding: the two wire formats accepted here never need to agree with what
//! the exporter emits.

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::Message;

/// Content type for binary protobuf OTLP payloads.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Content type for JSON OTLP payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Error produced when an inbound payload cannot be decoded.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The request carried a content type this receiver does not accept.
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),

    /// The body was not a valid protobuf export request.
    #[error("failed to decode protobuf payload")]
    Protobuf(#[from] prost::DecodeError),

    /// The body was not a valid JSON export request.
    #[error("failed to decode json payload")]
    Json(#[from] serde_json::Error),
}

/// Decodes an OTLP trace export payload into its resource-span groups.
///
/// The decoder is selected by `content_type`; parameters after a `;` (such as
/// a charset) are ignored.
///
/// # Errors
///
/// Returns [`DecodeError`] for an unrecognised content type or an unparseable
/// body. Nothing is partially decoded.
pub fn decode_trace_request(
    content_type: &str,
    body: &[u8],
) -> Result<Vec<ResourceSpans>, DecodeError> {
    let request = if content_type.starts_with(CONTENT_TYPE_PROTOBUF) {
        ExportTraceServiceRequest::decode(body)?
    } else if content_type.starts_with(CONTENT_TYPE_JSON) {
        serde_json::from_slice(body)?
    } else {
        return Err(DecodeError::UnsupportedContentType(
            content_type.to_string(),
        ));
    };

    Ok(request.resource_spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::{ScopeSpans, Span};

    fn sample_request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        name: "decoded-span".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn decodes_protobuf_payload() {
        let body = sample_request().encode_to_vec();

        let units = decode_trace_request(CONTENT_TYPE_PROTOBUF, &body).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].scope_spans[0].spans[0].name, "decoded-span");
    }

    #[test]
    fn decodes_json_payload() {
        let body = r#"{"resourceSpans":[{"scopeSpans":[{"spans":[{"name":"json-span"}]}]}]}"#;

        let units = decode_trace_request(CONTENT_TYPE_JSON, body.as_bytes()).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].scope_spans[0].spans[0].name, "json-span");
    }

    #[test]
    fn accepts_content_type_parameters() {
        let units =
            decode_trace_request("application/json; charset=utf-8", b"{\"resourceSpans\":[]}")
                .unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn rejects_unknown_content_type() {
        let err = decode_trace_request("text/plain", b"whatever").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedContentType(_)));
    }

    #[test]
    fn rejects_missing_content_type() {
        let err = decode_trace_request("", b"").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedContentType(_)));
    }

    #[test]
    fn rejects_malformed_protobuf() {
        let err = decode_trace_request(CONTENT_TYPE_PROTOBUF, b"\xff\xff\xff").unwrap_err();
        assert!(matches!(err, DecodeError::Protobuf(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_trace_request(CONTENT_TYPE_JSON, b"{not json}").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}

//! The JSON envelope returned by inference routes.
//!
//! Module responses stay opaque JSON objects. Gateway metadata is merged in
//! only when the envelope is rendered, so nothing upstream has to care about it.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

/// Value of `processedBy` for requests handled on this node.
pub const PROCESSED_LOCALLY: &str = "localhost";

/// RFC 1123 form used for `timestampUTC`.
const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// What produced the response.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    /// A module's own response object.
    Module(Map<String, Value>),
    /// The gateway could not obtain a module response.
    Error {
        /// HTTP-like status code.
        code: u16,
        /// Human readable reason.
        error: String,
    },
}

/// A response plus the gateway's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// The response itself.
    pub body: EnvelopeBody,
    /// Round trip as measured by the gateway.
    pub analysis_round_trip_ms: Option<u64>,
    /// Node that processed the request.
    pub processed_by: Option<String>,
}

impl ResponseEnvelope {
    /// Wraps a module response.
    #[must_use]
    pub fn module(body: Map<String, Value>) -> Self {
        Self {
            body: EnvelopeBody::Module(body),
            analysis_round_trip_ms: None,
            processed_by: None,
        }
    }

    /// Builds an error envelope.
    #[must_use]
    pub fn error(code: StatusCode, error: impl Into<String>) -> Self {
        Self {
            body: EnvelopeBody::Error {
                code: code.as_u16(),
                error: error.into(),
            },
            analysis_round_trip_ms: None,
            processed_by: None,
        }
    }

    /// Sets the measured round trip.
    #[must_use]
    pub fn with_round_trip(mut self, ms: u64) -> Self {
        self.analysis_round_trip_ms = Some(ms);
        self
    }

    /// Sets the processing node.
    #[must_use]
    pub fn with_processed_by(mut self, hostname: impl Into<String>) -> Self {
        self.processed_by = Some(hostname.into());
        self
    }

    /// `true` for a module response carrying `"success": true`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match &self.body {
            EnvelopeBody::Module(body) => body.get("success").and_then(Value::as_bool) == Some(true),
            EnvelopeBody::Error { .. } => false,
        }
    }

    /// Renders the JSON object with metadata stamped at `now`.
    #[must_use]
    pub fn into_json(self, now: DateTime<Utc>) -> Map<String, Value> {
        let mut object = match self.body {
            EnvelopeBody::Module(body) => body,
            EnvelopeBody::Error { code, error } => {
                let mut object = Map::new();
                object.insert("success".into(), json!(false));
                object.insert("code".into(), json!(code));
                object.insert("error".into(), json!(error));
                object
            }
        };

        if let Some(ms) = self.analysis_round_trip_ms {
            object.insert("analysisRoundTripMs".into(), json!(ms));
        }
        if let Some(hostname) = self.processed_by {
            object.insert("processedBy".into(), json!(hostname));
        }
        object.insert("timestampUTC".into(), json!(format_timestamp(now)));
        object
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        // Failures are reported in the body; the HTTP call itself succeeded.
        (StatusCode::OK, Json(Value::Object(self.into_json(Utc::now())))).into_response()
    }
}

/// Formats `time` as RFC 1123, e.g. `Mon, 19 Oct 2026 10:00:00 GMT`.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(RFC1123).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
    }

    #[test]
    fn timestamp_is_rfc1123() {
        assert_eq!(format_timestamp(noon()), "Mon, 19 Oct 2026 10:00:00 GMT");
    }

    #[test]
    fn module_body_is_kept_and_metadata_merged() {
        let mut body = Map::new();
        body.insert("success".into(), json!(true));
        body.insert("predictions".into(), json!([]));

        let envelope = ResponseEnvelope::module(body)
            .with_round_trip(42)
            .with_processed_by(PROCESSED_LOCALLY);
        assert!(envelope.is_success());

        let json = envelope.into_json(noon());
        assert_eq!(json["predictions"], json!([]));
        assert_eq!(json["analysisRoundTripMs"], 42);
        assert_eq!(json["processedBy"], "localhost");
        assert_eq!(json["timestampUTC"], "Mon, 19 Oct 2026 10:00:00 GMT");
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = ResponseEnvelope::error(StatusCode::INTERNAL_SERVER_ERROR, "The request timed out (#reqid 1)");
        assert!(!envelope.is_success());

        let json = envelope.into_json(noon());
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], 500);
        assert_eq!(json["error"], "The request timed out (#reqid 1)");
        assert!(!json.contains_key("processedBy"));
    }

    #[test]
    fn measured_round_trip_replaces_a_reported_one() {
        let mut body = Map::new();
        body.insert("success".into(), json!(true));
        body.insert("analysisRoundTripMs".into(), json!(7));

        let json = ResponseEnvelope::module(body)
            .with_round_trip(120)
            .with_processed_by("node-b")
            .into_json(noon());
        assert_eq!(json["analysisRoundTripMs"], 120);
        assert_eq!(json["processedBy"], "node-b");
    }
}

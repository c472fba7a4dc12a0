//! Shared helpers for OTLP decoding: attribute conversion, resource
//! inspection and content-type detection.

use crate::types::AttrMap;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;

/// Fallback when a resource carries no usable `service.name`.
pub const UNKNOWN_SERVICE_NAME: &str = "unknown";

/// Well-known attribute keys consulted during decoding and row building.
pub mod semconv {
    pub const SERVICE_NAME: &str = "service.name";
    pub const HOST_NAME: &str = "host.name";
    pub const ENVIRONMENT: &str = "deployment.environment";

    // Both the stable and the pre-1.21 names are accepted for HTTP/db fields.
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
    pub const HTTP_URL: &str = "http.url";
    pub const URL_FULL: &str = "url.full";
    pub const DB_SYSTEM: &str = "db.system";
}

/// Supported input formats for OTLP payloads on the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Binary protobuf (default, most efficient)
    Protobuf,
    /// JSON per the OTLP/JSON mapping
    Json,
}

impl InputFormat {
    /// Detect format from Content-Type header.
    ///
    /// Defaults to Protobuf if the header is missing or unrecognized.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.to_lowercase().contains("application/json") => Self::Json,
            _ => Self::Protobuf,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Protobuf => "application/x-protobuf",
            Self::Json => "application/json",
        }
    }
}

/// Format a scalar attribute value as text.
///
/// Integer and floating-point values use their decimal representation.
/// Array, kvlist and bytes values are unsupported and return None; callers
/// drop those entries from the attribute map.
pub fn any_value_string(value: &AnyValue) -> Option<String> {
    match value.value.as_ref()? {
        any_value::Value::StringValue(s) => Some(s.clone()),
        any_value::Value::BoolValue(b) => Some(b.to_string()),
        any_value::Value::IntValue(i) => Some(i.to_string()),
        any_value::Value::DoubleValue(d) => Some(d.to_string()),
        any_value::Value::ArrayValue(_)
        | any_value::Value::KvlistValue(_)
        | any_value::Value::BytesValue(_) => None,
    }
}

/// Convert an OTLP attribute list into the canonical string map.
pub fn attrs_to_map(attributes: &[KeyValue]) -> AttrMap {
    let mut map = AttrMap::new();
    for attr in attributes {
        if let Some(text) = attr.value.as_ref().and_then(any_value_string) {
            map.insert(attr.key.clone(), text);
        }
    }
    map
}

/// Extract `service.name` from a resource, falling back to "unknown".
pub fn resource_service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|resource| {
            resource
                .attributes
                .iter()
                .find(|attr| attr.key == semconv::SERVICE_NAME)
        })
        .and_then(|attr| attr.value.as_ref())
        .and_then(any_value_string)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE_NAME.to_string())
}

/// Render an OTLP id (trace or span) as lowercase hex; empty input stays empty.
pub fn id_to_hex(id: &[u8]) -> String {
    if id.is_empty() || id.iter().all(|b| *b == 0) {
        String::new()
    } else {
        hex::encode(id)
    }
}

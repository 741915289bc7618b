//! JSON payload rewriting between gateway and backend contracts.
//!
//! Both directions are pure functions of `(body, rule)` plus, for requests, the
//! inbound headers. Any parse or serialise failure yields the original bytes
//! unchanged; transformation never fails a request.
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_TYPE};
use serde_json::{Map, Value};

use crate::config::models::TransformConfig;

/// Result of rewriting a backend response body.
#[derive(Debug, Clone)]
pub struct TransformedResponse {
    pub body: Bytes,
    /// Headers extracted from the body, to be set on the client response.
    pub headers: HeaderMap,
    /// `false` when the body was passed through untouched.
    pub rewritten: bool,
}

pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

fn apply_field_mapping(object: &mut Map<String, Value>, rule: &TransformConfig) {
    for (from, to) in &rule.field_mapping {
        if let Some(value) = object.get(from).cloned() {
            object.insert(to.clone(), value);
            if from != to {
                object.remove(from);
            }
        }
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("body is not a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Rewrite an outbound request body. Only JSON bodies (by `Content-Type`) are touched.
pub fn transform_request(rule: &TransformConfig, headers: &HeaderMap, body: Bytes) -> Bytes {
    if !is_json_content_type(headers) {
        return body;
    }

    let mut object = match parse_object(&body) {
        Ok(object) => object,
        Err(error) => {
            tracing::warn!(%error, "Request body transformation skipped");
            return body;
        }
    };

    apply_field_mapping(&mut object, rule);

    for (header, field) in &rule.header_to_body {
        let value = headers
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            object.insert(field.clone(), Value::String(value.to_string()));
        }
    }

    match serde_json::to_vec(&object) {
        Ok(rewritten) => Bytes::from(rewritten),
        Err(error) => {
            tracing::warn!(%error, "Failed to serialise transformed request body");
            body
        }
    }
}

/// Rewrite a backend response body and extract configured fields into headers.
pub fn transform_response(rule: &TransformConfig, body: Bytes) -> TransformedResponse {
    let passthrough = |body: Bytes| TransformedResponse {
        body,
        headers: HeaderMap::new(),
        rewritten: false,
    };

    let mut object = match parse_object(&body) {
        Ok(object) => object,
        Err(error) => {
            tracing::warn!(%error, "Response body is not a JSON object, passing through");
            return passthrough(body);
        }
    };

    apply_field_mapping(&mut object, rule);

    let mut headers = HeaderMap::new();
    for (field, header) in &rule.body_to_header {
        let Some(value) = object.get(field) else {
            continue;
        };
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.is_empty() {
            continue;
        }
        match (
            HeaderName::from_bytes(header.as_bytes()),
            HeaderValue::from_str(&text),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(field = %field, header = %header, "Skipping unrepresentable header"),
        }
    }

    match serde_json::to_vec(&object) {
        Ok(rewritten) => TransformedResponse {
            body: Bytes::from(rewritten),
            headers,
            rewritten: true,
        },
        Err(error) => {
            tracing::warn!(%error, "Failed to serialise transformed response body");
            passthrough(body)
        }
    }
}

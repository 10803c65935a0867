//! Structured payload decoding.
//!
//! POST bodies are parsed as JSON; every other method's body is parsed as
//! an url-encoded form. Either way the result must be a structured mapping
//! ([`Payload`]); a JSON literal of any other kind is rejected with its
//! runtime type name attached. Form parsing always yields a mapping, so
//! the type rejection can only fire on POST.

use http::Method;
use serde_json::Value;

use crate::handler::Payload;
use crate::pipeline::PipelineError;

pub(crate) fn decode_payload(method: &Method, body: &[u8]) -> Result<Payload, PipelineError> {
    if method == Method::POST {
        decode_json(body)
    } else {
        decode_form(body)
    }
}

fn decode_json(body: &[u8]) -> Result<Payload, PipelineError> {
    let value: Value = serde_json::from_slice(body).map_err(PipelineError::decode_failed)?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::InvalidPayloadType { kind: value_kind(&other) }),
    }
}

fn decode_form(body: &[u8]) -> Result<Payload, PipelineError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).map_err(PipelineError::decode_failed)?;

    Ok(pairs.into_iter().map(|(key, value)| (key, Value::String(value))).collect())
}

/// The runtime type name of a decoded JSON value, surfaced in the
/// payload-type rejection.
fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_json_object_decodes() {
        let payload = decode_payload(&Method::POST, br#"{"a":1}"#).unwrap();
        assert_eq!(payload.get("a"), Some(&json!(1)));
    }

    #[test]
    fn form_body_decodes_to_string_fields() {
        let payload = decode_payload(&Method::GET, b"a=1&b=2").unwrap();
        assert_eq!(payload.get("a"), Some(&json!("1")));
        assert_eq!(payload.get("b"), Some(&json!("2")));
    }

    #[test]
    fn empty_form_body_is_an_empty_mapping() {
        let payload = decode_payload(&Method::GET, b"").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn json_literals_are_rejected_with_their_kind() {
        for (body, kind) in [(&b"42"[..], "number"), (br#""str""#, "string"), (b"null", "null"), (b"[1,2]", "array"), (b"true", "boolean")] {
            let err = decode_payload(&Method::POST, body).unwrap_err();
            match err {
                PipelineError::InvalidPayloadType { kind: got } => assert_eq!(got, kind),
                other => panic!("expected type rejection for {kind}, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_json_is_a_decode_failure() {
        let err = decode_payload(&Method::POST, b"{not json").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFailed { .. }));
    }

    #[test]
    fn empty_post_body_is_a_decode_failure() {
        let err = decode_payload(&Method::POST, b"").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFailed { .. }));
    }
}

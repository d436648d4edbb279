//! Pluggable envelope codec.
//!
//! A [`Codec`] turns envelopes into frame bytes and back. Argument and result
//! payloads stay opaque bytes inside the envelope; handlers reach them through
//! [`Codec::decode_payload`] / [`Codec::encode_payload`], which go through
//! `serde_json::Value` as a format-neutral data model. That keeps the trait
//! object-safe while still letting every handler decode into its own typed
//! argument struct (see [`decode_value`]).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use std::borrow::Cow;

use crate::types::{Request, Response};

/// Error encoding or decoding an envelope or payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON syntax or shape error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A text payload was not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Encode/decode contract for envelopes and payloads.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Whether encoded frames should travel as binary (rather than text) frames.
    fn is_binary(&self) -> bool {
        false
    }

    /// Decode an inbound frame into a request envelope.
    fn decode_request(&self, frame: &[u8]) -> Result<Request, CodecError>;

    /// Encode a request envelope (client side, tests).
    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, CodecError>;

    /// Decode a response envelope (client side, tests).
    fn decode_response(&self, frame: &[u8]) -> Result<Response, CodecError>;

    /// Encode an outbound response envelope.
    fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError>;

    /// Decode a payload into the neutral data model. Empty payloads decode to `null`.
    fn decode_payload(&self, payload: &[u8]) -> Result<Value, CodecError>;

    /// Encode a neutral value as a payload.
    fn encode_payload(&self, value: &Value) -> Result<Bytes, CodecError>;
}

/// Encode any serializable value as a payload with `codec`.
pub fn encode_value<T: Serialize + ?Sized>(codec: &dyn Codec, value: &T) -> Result<Bytes, CodecError> {
    codec.encode_payload(&serde_json::to_value(value)?)
}

/// Decode a payload into `T` with `codec`.
pub fn decode_value<T: DeserializeOwned>(codec: &dyn Codec, payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_value(codec.decode_payload(payload)?)?)
}

/// Default codec: JSON objects with `method`, `clientId`, `args`/`data`, `status` keys.
///
/// Payload bytes are the raw JSON text of the `args`/`data` field.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

#[derive(Serialize, Deserialize)]
struct WireRequest<'a> {
    #[serde(borrow)]
    method: Cow<'a, str>,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    client_id: Option<i64>,
    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    args: Option<&'a RawValue>,
}

#[derive(Serialize, Deserialize)]
struct WireResponse<'a> {
    status: i32,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    client_id: Option<i64>,
    #[serde(borrow, default)]
    method: Cow<'a, str>,
    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

/// Borrow a payload as raw JSON, `None` when empty.
fn raw_json(payload: &[u8]) -> Result<Option<&RawValue>, CodecError> {
    if payload.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(payload)?;
    Ok(Some(serde_json::from_str(text)?))
}

fn raw_bytes(raw: Option<&RawValue>) -> Bytes {
    raw.map(|r| Bytes::copy_from_slice(r.get().as_bytes()))
        .unwrap_or_default()
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode_request(&self, frame: &[u8]) -> Result<Request, CodecError> {
        let wire: WireRequest<'_> = serde_json::from_slice(frame)?;
        Ok(Request {
            method: wire.method.into_owned(),
            client_id: wire.client_id,
            args: raw_bytes(wire.args),
        })
    }

    fn encode_request(&self, request: &Request) -> Result<Vec<u8>, CodecError> {
        let wire = WireRequest {
            method: Cow::Borrowed(&request.method),
            client_id: request.client_id,
            args: raw_json(&request.args)?,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode_response(&self, frame: &[u8]) -> Result<Response, CodecError> {
        let wire: WireResponse<'_> = serde_json::from_slice(frame)?;
        Ok(Response {
            status: wire.status,
            client_id: wire.client_id,
            method: wire.method.into_owned(),
            data: raw_bytes(wire.data),
        })
    }

    fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError> {
        let wire = WireResponse {
            status: response.status,
            client_id: response.client_id,
            method: Cow::Borrowed(&response.method),
            data: raw_json(&response.data)?,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<Value, CodecError> {
        if payload.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(payload)?)
    }

    fn encode_payload(&self, value: &Value) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PingPong, STATUS_OK, STATUS_PING};
    use serde_json::json;

    #[test]
    fn decode_request_with_all_fields() {
        let frame = br#"{"method":"hello","clientId":42,"args":{"Name":"world"}}"#;
        let req = JsonCodec.decode_request(frame).unwrap();
        assert_eq!(req.method, "hello");
        assert_eq!(req.client_id, Some(42));
        assert_eq!(&req.args[..], br#"{"Name":"world"}"#);
    }

    #[test]
    fn decode_request_without_optional_fields() {
        let req = JsonCodec.decode_request(br#"{"method":"hello"}"#).unwrap();
        assert_eq!(req.method, "hello");
        assert!(req.client_id.is_none());
        assert!(req.args.is_empty());
    }

    #[test]
    fn decode_request_null_args_is_empty() {
        let req = JsonCodec
            .decode_request(br#"{"method":"hello","args":null}"#)
            .unwrap();
        assert!(req.args.is_empty());
    }

    #[test]
    fn decode_request_escaped_method() {
        let req = JsonCodec
            .decode_request(br#"{"method":"he\"llo"}"#)
            .unwrap();
        assert_eq!(req.method, "he\"llo");
    }

    #[test]
    fn decode_request_rejects_garbage() {
        assert!(JsonCodec.decode_request(b"not json at all").is_err());
        assert!(JsonCodec.decode_request(b"").is_err());
        assert!(JsonCodec.decode_request(b"[1,2,3]").is_err());
    }

    #[test]
    fn decode_request_requires_method() {
        assert!(JsonCodec.decode_request(br#"{"clientId":1}"#).is_err());
    }

    #[test]
    fn encode_response_embeds_raw_data() {
        let resp = Response::success("hello", None, Bytes::from_static(b"\"hello world\""));
        let bytes = JsonCodec.encode_response(&resp).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed,
            json!({"status": 0, "method": "hello", "data": "hello world"})
        );
    }

    #[test]
    fn encode_response_omits_empty_data_and_client_id() {
        let resp = Response::success("noop", None, Bytes::new());
        let bytes = JsonCodec.encode_response(&resp).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"status":0,"method":"noop"}"#);
    }

    #[test]
    fn encode_response_rejects_non_json_data() {
        let resp = Response::success("bad", None, Bytes::from_static(b"cnt = 0"));
        assert!(JsonCodec.encode_response(&resp).is_err());
    }

    #[test]
    fn ping_frame_shape() {
        let data = encode_value(&JsonCodec, &PingPong { ts: 123 }).unwrap();
        let bytes = JsonCodec.encode_response(&Response::ping(data)).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!({"status": 1, "method": "ping", "data": {"ts": 123}}));
    }

    #[test]
    fn client_side_envelopes() {
        let req = Request::new("pong")
            .with_client_id(9)
            .with_args(Bytes::from_static(br#"{"ts":5}"#));
        let frame = JsonCodec.encode_request(&req).unwrap();
        assert_eq!(JsonCodec.decode_request(&frame).unwrap(), req);

        let resp = JsonCodec
            .decode_response(br#"{"status":1,"method":"ping","data":{"ts":77}}"#)
            .unwrap();
        assert_eq!(resp.status, STATUS_PING);
        let pp: PingPong = decode_value(&JsonCodec, &resp.data).unwrap();
        assert_eq!(pp.ts, 77);
    }

    #[test]
    fn decode_response_defaults() {
        let resp = JsonCodec.decode_response(br#"{"status":0}"#).unwrap();
        assert_eq!(resp.status, STATUS_OK);
        assert!(resp.method.is_empty());
        assert!(resp.data.is_empty());
    }

    #[test]
    fn decode_payload_empty_is_null() {
        assert_eq!(JsonCodec.decode_payload(b"").unwrap(), Value::Null);
    }

    #[test]
    fn typed_payload_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Args {
            #[serde(rename = "Name")]
            name: String,
        }

        let payload = encode_value(&JsonCodec, &Args { name: "x".into() }).unwrap();
        let back: Args = decode_value(&JsonCodec, &payload).unwrap();
        assert_eq!(back.name, "x");

        let mismatch: Result<Args, _> = decode_value(&JsonCodec, b"[1]");
        assert!(mismatch.is_err());
    }

    #[test]
    fn codec_is_object_safe() {
        let codec: std::sync::Arc<dyn Codec> = std::sync::Arc::new(JsonCodec);
        assert_eq!(codec.name(), "json");
        assert!(!codec.is_binary());
    }
}

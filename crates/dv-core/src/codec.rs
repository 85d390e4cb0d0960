//! Wire codecs.
//!
//! The session core never parses bytes itself; it goes through a
//! [`MessageCodec`]. [`JsonCodec`] is the bundled implementation.

use std::fmt;

use crate::back_msg::BackMsg;
use crate::forward_msg::ForwardMsg;

/// Encoding or decoding failure.
#[derive(Debug)]
pub enum CodecError {
    /// Input bytes are not a valid message.
    Decode(String),
    /// A message could not be encoded.
    Encode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Encode(msg) => write!(f, "encode error: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Serialization layer used by the session.
pub trait MessageCodec {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Decode one server message.
    fn decode_forward(&self, bytes: &[u8]) -> Result<ForwardMsg, CodecError>;

    /// Encode one upstream message.
    fn encode_back(&self, msg: &BackMsg) -> Result<Vec<u8>, CodecError>;
}

/// JSON wire format via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a forward message; the server side of the JSON protocol, used by hosts and tests.
    pub fn encode_forward(&self, msg: &ForwardMsg) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode an upstream message.
    pub fn decode_back(&self, bytes: &[u8]) -> Result<BackMsg, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl MessageCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn decode_forward(&self, bytes: &[u8]) -> Result<ForwardMsg, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_back(&self, msg: &BackMsg) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back_msg::RerunRequest;
    use crate::block::Block;
    use crate::delta::Delta;
    use crate::element::Element;
    use crate::forward_msg::{ForwardMsgBody, ForwardMsgMetadata};
    use crate::widget::{WidgetState, WidgetStates, WidgetValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_hand_written_delta() {
        let bytes = br#"{
            "hash": "h1",
            "metadata": {"cacheable": true, "delta_path": [0, 2]},
            "type": "delta",
            "delta": {"op": "new_element", "payload": {"type": "text", "body": "Hello"}}
        }"#;
        let msg = JsonCodec.decode_forward(bytes).unwrap();
        assert_eq!(msg.hash.as_str(), "h1");
        assert!(msg.metadata.cacheable);
        assert_eq!(msg.metadata.delta_path, vec![0, 2]);
        assert_eq!(
            msg.body,
            ForwardMsgBody::Delta {
                delta: Delta::NewElement(Element::text("Hello"))
            }
        );
    }

    #[test]
    fn decodes_reference_and_form_block() {
        let reference = JsonCodec
            .decode_forward(br#"{"metadata": {"delta_path": [1, 0]}, "type": "ref_hash", "ref_hash": "abc"}"#)
            .unwrap();
        assert_eq!(reference.ref_hash().map(|h| h.as_str()), Some("abc"));

        let form = ForwardMsg::new(
            "f",
            ForwardMsgMetadata::at(vec![0, 0]),
            ForwardMsgBody::Delta {
                delta: Delta::AddBlock(Block::form("login", true)),
            },
        );
        let bytes = JsonCodec.encode_forward(&form).unwrap();
        assert_eq!(JsonCodec.decode_forward(&bytes).unwrap(), form);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = JsonCodec.decode_forward(b"not json").unwrap_err();
        assert!(err.to_string().starts_with("decode error"));
    }

    #[test]
    fn back_msg_encodes_widget_states() {
        let msg = BackMsg::RerunScript {
            request: RerunRequest {
                widget_states: WidgetStates {
                    widgets: vec![WidgetState {
                        id: "slider".into(),
                        value: WidgetValue::DoubleArray(vec![0.25]),
                    }],
                },
                page_script_hash: String::new(),
            },
        };
        let bytes = JsonCodec.encode_back(&msg).unwrap();
        assert_eq!(JsonCodec.decode_back(&bytes).unwrap(), msg);
    }
}

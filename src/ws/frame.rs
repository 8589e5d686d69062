//! Logical wire frames
//!
//! Requests carry an `op` discriminator: `{op:"subscribe",topic,params}`,
//! `{op:"unsubscribe",topic,params}`, `{op:"ping"}`, `{op:"pong"}`. Inbound
//! pushes carry no `op`: `{topic,params,payload}`. Payloads are opaque to
//! this layer and forwarded verbatim.

use crate::core::{Params, Topic};
use crate::ws::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical frame on a provider connection
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe { topic: Topic, params: Params },
    Unsubscribe { topic: Topic, params: Params },
    Ping,
    Pong,
    Push { topic: Topic, params: Params, payload: Value },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireFrame {
    Op(OpFrame),
    Push(PushFrame),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum OpFrame {
    Subscribe { topic: Topic, params: Params },
    Unsubscribe { topic: Topic, params: Params },
    Ping,
    Pong,
}

#[derive(Serialize, Deserialize)]
struct PushFrame {
    topic: Topic,
    #[serde(default)]
    params: Params,
    payload: Value,
}

impl Frame {
    /// Serialize to the JSON text representation
    ///
    /// # Errors
    /// Returns a codec error if serialization fails (should not happen for
    /// well-formed frames).
    pub fn encode(&self) -> Result<String, TransportError> {
        let wire = match self.clone() {
            Frame::Subscribe { topic, params } => WireFrame::Op(OpFrame::Subscribe { topic, params }),
            Frame::Unsubscribe { topic, params } => {
                WireFrame::Op(OpFrame::Unsubscribe { topic, params })
            }
            Frame::Ping => WireFrame::Op(OpFrame::Ping),
            Frame::Pong => WireFrame::Op(OpFrame::Pong),
            Frame::Push { topic, params, payload } => {
                WireFrame::Push(PushFrame { topic, params, payload })
            }
        };
        serde_json::to_string(&wire).map_err(|e| TransportError::Codec(e.to_string()))
    }

    /// Parse a frame from JSON text
    ///
    /// # Errors
    /// Returns a codec error if the text is not a known frame shape.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let wire: WireFrame =
            serde_json::from_str(text).map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(match wire {
            WireFrame::Op(OpFrame::Subscribe { topic, params }) => Frame::Subscribe { topic, params },
            WireFrame::Op(OpFrame::Unsubscribe { topic, params }) => {
                Frame::Unsubscribe { topic, params }
            }
            WireFrame::Op(OpFrame::Ping) => Frame::Ping,
            WireFrame::Op(OpFrame::Pong) => Frame::Pong,
            WireFrame::Push(PushFrame { topic, params, payload }) => {
                Frame::Push { topic, params, payload }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic() -> Topic {
        "p.trades.BTCUSDT".parse().unwrap()
    }

    #[test]
    fn test_subscribe_encodes_op_tag() {
        let frame = Frame::Subscribe {
            topic: topic(),
            params: Params::new().set("tf", "1m"),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["topic"], "p.trades.BTCUSDT");
        assert_eq!(value["params"]["tf"], "1m");
    }

    #[test]
    fn test_ping_pong_round_trip() {
        assert_eq!(Frame::decode(r#"{"op":"ping"}"#).unwrap(), Frame::Ping);
        assert_eq!(Frame::decode(r#"{"op":"pong"}"#).unwrap(), Frame::Pong);
        assert_eq!(Frame::Ping.encode().unwrap(), r#"{"op":"ping"}"#);
    }

    #[test]
    fn test_push_has_no_op() {
        let text = r#"{"topic":"p.trades.BTCUSDT","params":{"tf":"1m"},"payload":{"price":42}}"#;
        match Frame::decode(text).unwrap() {
            Frame::Push { topic: t, params, payload } => {
                assert_eq!(t, topic());
                assert_eq!(params, Params::new().set("tf", "1m"));
                assert_eq!(payload, json!({"price": 42}));
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn test_push_params_optional() {
        let text = r#"{"topic":"p.c.i","payload":[1,2,3]}"#;
        match Frame::decode(text).unwrap() {
            Frame::Push { params, payload, .. } => {
                assert!(params.is_empty());
                assert_eq!(payload, json!([1, 2, 3]));
            }
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_forwarded_verbatim() {
        let frame = Frame::Push {
            topic: topic(),
            params: Params::new(),
            payload: json!({"nested": {"deep": [true, null, "x"]}}),
        };
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode(r#"{"op":"subscribe"}"#).is_err());
        assert!(Frame::decode(r#"{"op":"nope","topic":"a.b.c","params":{}}"#).is_err());
        assert!(Frame::decode(r#"{"hello":"world"}"#).is_err());
    }
}

//! Frame ⇄ message conversion.
//!
//! Outbound frames are the JSON form of [`Message`]. Inbound frames may be
//! either that form or a JSON-RPC 2.0 object, which is normalised into a
//! message with an `rpc` payload.
use hivemind_core::{Error, Message, MessageKind, Payload, Result};
use serde_json::Value;

use crate::Frame;

pub fn encode(message: &Message) -> Result<Frame> {
    Ok(Frame::new(serde_json::to_string(message)?))
}

/// Decode an inbound frame received on `link`. Messages without a sender are
/// attributed to the link.
pub fn decode(link: &str, frame: &Frame) -> Result<Message> {
    let value: Value = serde_json::from_str(frame.text.trim())
        .map_err(|e| Error::Validation(format!("frame on {} is not JSON: {}", link, e)))?;

    let mut message = if value.get("jsonrpc").is_some() {
        from_json_rpc(&value)?
    } else {
        serde_json::from_value::<Message>(value)
            .map_err(|e| Error::Validation(format!("frame on {} is not a message: {}", link, e)))?
    };

    if message.from.is_none() {
        message.from = Some(link.to_string());
    }
    Ok(message)
}

fn from_json_rpc(value: &Value) -> Result<Message> {
    let method = value.get("method").and_then(|m| m.as_str());
    let has_id = value.get("id").map(|id| !id.is_null()).unwrap_or(false);
    let result = value.get("result").cloned();
    let error = value.get("error").filter(|e| !e.is_null());

    let kind = match (method, has_id) {
        (Some(_), true) => MessageKind::Request,
        (Some(_), false) => MessageKind::Notification,
        (None, _) if result.is_some() || error.is_some() => MessageKind::Response,
        _ => {
            return Err(Error::Validation(
                "JSON-RPC frame has neither method nor result".to_string(),
            ))
        }
    };

    let mut message = Message::new(
        kind,
        method.unwrap_or_default(),
        Payload::Rpc {
            params: value.get("params").cloned(),
            result,
        },
    );

    if let Some(id) = value.get("id") {
        match id {
            Value::String(s) => message.id = s.clone(),
            Value::Number(n) => message.id = n.to_string(),
            _ => {}
        }
    }

    if let Some(err) = error {
        let text = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| err.to_string());
        message.error = Some(text);
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivemind_core::TaskPriority;

    #[test]
    fn test_native_message_keeps_fields() {
        let msg = Message::command("task/run", Payload::Empty)
            .with_from("coordinator-1")
            .with_to("qa-1")
            .with_priority(TaskPriority::High);
        let frame = encode(&msg).unwrap();
        let decoded = decode("remote", &frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_missing_sender_attributed_to_link() {
        let msg = Message::notification("ping", Payload::Empty);
        let decoded = decode("remote", &encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.from.as_deref(), Some("remote"));
    }

    #[test]
    fn test_json_rpc_request() {
        let frame = Frame::new(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"x"}}"#);
        let msg = decode("mcp", &frame).unwrap();
        assert_eq!(msg.kind, MessageKind::Request);
        assert_eq!(msg.id, "7");
        assert_eq!(msg.method, "tools/call");
        match msg.payload {
            Payload::Rpc { params, result } => {
                assert_eq!(params.unwrap()["name"], "x");
                assert!(result.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_json_rpc_notification_and_error_response() {
        let note = decode("mcp", &Frame::new(r#"{"jsonrpc":"2.0","method":"progress"}"#)).unwrap();
        assert_eq!(note.kind, MessageKind::Notification);

        let err = decode(
            "mcp",
            &Frame::new(r#"{"jsonrpc":"2.0","id":"a1","error":{"code":-32601,"message":"Method not found"}}"#),
        )
        .unwrap();
        assert_eq!(err.kind, MessageKind::Response);
        assert_eq!(err.id, "a1");
        assert_eq!(err.error.as_deref(), Some("Method not found"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode("x", &Frame::new("not json")),
            Err(Error::Validation(_))
        ));
        assert!(decode("x", &Frame::new(r#"{"jsonrpc":"2.0","id":1}"#)).is_err());
    }
}

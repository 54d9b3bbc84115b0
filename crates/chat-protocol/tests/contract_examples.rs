//! Fixed JSON examples for each wire shape, so a client implementation in
//! another language has a concrete contract to parse against.

use chat_protocol::*;
use uuid::Uuid;

#[test]
fn submit_ack_serializes_with_expected_field_names() {
    let ack = SubmitAck {
        message_id: Uuid::nil(),
        correlation_id: Uuid::nil(),
        state: MessageState::Pending,
        accepted_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
        idempotency_key: "abc123".to_owned(),
        idempotent_hit: false,
    };
    let json: serde_json::Value = serde_json::to_value(&ack).unwrap();
    assert_eq!(json["state"], "pending");
    assert_eq!(json["idempotency_key"], "abc123");
    assert_eq!(json["idempotent_hit"], false);
}

#[test]
fn message_send_frame_parses_minimal_example() {
    let json = r#"{
        "kind": "message_send",
        "conversation_id": "conv-1",
        "user_id": "u1",
        "content": "hello",
        "ts": "2026-01-01T00:00:00Z"
    }"#;
    let msg: WsMessage = serde_json::from_str(json).expect("parses");
    match msg {
        WsMessage::MessageSend(frame) => {
            assert_eq!(frame.conversation_id, "conv-1");
            assert_eq!(frame.content, "hello");
            assert_eq!(frame.client_message_id, None);
        }
        other => panic!("expected message_send, got {other:?}"),
    }
}

#[test]
fn error_frame_round_trips() {
    let msg = WsMessage::Error(ErrorFrame {
        code: error_codes::PROTOCOL_ERROR.to_owned(),
        message: "bad frame".to_owned(),
        details: None,
    });
    let json = serde_json::to_string(&msg).unwrap();
    let back: WsMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(msg, back);
}

#[test]
fn http_error_envelope_omits_details_when_none() {
    let env = HttpErrorEnvelope {
        code: "BAD_REQUEST".to_owned(),
        message: "oops".to_owned(),
        details: None,
    };
    let json = serde_json::to_string(&env).unwrap();
    assert!(!json.contains("details"));
}

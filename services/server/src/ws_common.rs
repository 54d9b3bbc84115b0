use axum::extract::ws::{Message, WebSocket};
use chat_protocol::{ErrorFrame, WsMessage};

fn error_json(code: &str, message: &str) -> Option<String> {
    serde_json::to_string(&WsMessage::Error(ErrorFrame {
        code: code.to_owned(),
        message: message.to_owned(),
        details: None,
    }))
    .ok()
}

pub async fn send_ws_error(socket: &mut WebSocket, code: &str, message: &str) {
    if let Some(json) = error_json(code, message) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
}

pub async fn send_ws_message(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

/// Handshake carries user-id in the `user_id` query parameter; §6 also
/// allows an auth payload, but this spec carries no authentication, so the
/// query string is the sole source.
pub fn extract_user_id_from_query(uri: &axum::http::Uri) -> Option<String> {
    let query = uri.query()?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == "user_id" && !value.is_empty() {
            return Some(value.to_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_user_id_from_query_finds_param() {
        let uri: axum::http::Uri = "/ws?user_id=u1&foo=bar".parse().unwrap();
        assert_eq!(extract_user_id_from_query(&uri), Some("u1".to_owned()));
    }

    #[test]
    fn extract_user_id_from_query_missing_param_is_none() {
        let uri: axum::http::Uri = "/ws?foo=bar".parse().unwrap();
        assert_eq!(extract_user_id_from_query(&uri), None);
    }

    #[test]
    fn extract_user_id_from_query_rejects_empty_value() {
        let uri: axum::http::Uri = "/ws?user_id=".parse().unwrap();
        assert_eq!(extract_user_id_from_query(&uri), None);
    }
}

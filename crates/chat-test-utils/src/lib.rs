// chat-test-utils: Shared test utilities for the chat transport suite.
//
// Provides a mock WebSocket server and client for integration testing of
// socket clients against the wire protocol without the full server binary.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::*;

    #[tokio::test]
    async fn mock_server_starts_and_reports_port() {
        let server = MockWsServer::start().await.unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0, "should bind to a real port");
    }

    #[tokio::test]
    async fn mock_server_join_handshake() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());

        let mut client = MockWsClient::connect(&url).await.unwrap();

        let join = WsMessage::Join(JoinFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            ts: chrono::Utc::now(),
        });
        client.send_message(&join).await.unwrap();

        let response = client.recv_message().await.unwrap();
        match response {
            WsMessage::JoinAck(ack) => assert!(ack.joined),
            other => panic!("expected JoinAck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_server_rejects_non_join_first_frame() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());

        let mut client = MockWsClient::connect(&url).await.unwrap();

        let send = WsMessage::MessageSend(MessageSendFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            content: "too early".to_owned(),
            content_type: None,
            client_message_id: None,
            ts: chrono::Utc::now(),
        });
        client.send_message(&send).await.unwrap();

        let response = client.recv_message().await.unwrap();
        match response {
            WsMessage::Error(err) => assert_eq!(err.code, error_codes::PROTOCOL_ERROR),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_server_acks_message_send_after_join() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());

        let mut client = MockWsClient::connect(&url).await.unwrap();

        let join = WsMessage::Join(JoinFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            ts: chrono::Utc::now(),
        });
        client.send_message(&join).await.unwrap();
        let _ = client.recv_message().await.unwrap();

        let send = WsMessage::MessageSend(MessageSendFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            content: "hello".to_owned(),
            content_type: Some(ContentType::Text),
            client_message_id: Some("cid-1".to_owned()),
            ts: chrono::Utc::now(),
        });
        client.send_message(&send).await.unwrap();

        let ack = client.recv_message().await.unwrap();
        assert!(matches!(ack, WsMessage::MessageAck(_)));
    }

    #[tokio::test]
    async fn mock_server_handles_multiple_clients() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}", server.local_addr());

        let mut client1 = MockWsClient::connect(&url).await.unwrap();
        let mut client2 = MockWsClient::connect(&url).await.unwrap();

        let join1 = WsMessage::Join(JoinFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            ts: chrono::Utc::now(),
        });
        let join2 = WsMessage::Join(JoinFrame {
            conversation_id: "conv-2".to_owned(),
            user_id: "u2".to_owned(),
            ts: chrono::Utc::now(),
        });

        client1.send_message(&join1).await.unwrap();
        client2.send_message(&join2).await.unwrap();

        let ack1 = client1.recv_message().await.unwrap();
        let ack2 = client2.recv_message().await.unwrap();
        assert!(matches!(ack1, WsMessage::JoinAck(_)));
        assert!(matches!(ack2, WsMessage::JoinAck(_)));
    }
}

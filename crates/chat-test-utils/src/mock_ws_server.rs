// mock_ws_server: A mock WebSocket server for testing socket clients against
// the chat wire protocol without standing up the full server binary.
//
// Accepts connections on ws://localhost:<port>, requires `join` as the first
// frame, responds with `join_ack`, and echoes `message_send` frames back as
// `message_ack` so client-side send/ack loops can be exercised in isolation.

use std::net::SocketAddr;

use chat_protocol::*;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock WebSocket server for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Each test
/// can spin up its own isolated server instance.
///
/// # Protocol behavior
///
/// - First message from a client must be `join`. Any other message produces
///   an `error` response with code `PROTOCOL_ERROR`.
/// - After a valid join, the server responds with a `join_ack`.
/// - Subsequent `message_send` frames are acked with `message_ack` carrying
///   a freshly generated message id.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Handle to the background accept loop; dropped when the server is dropped.
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Start the mock server, binding to a random available port.
    ///
    /// Returns immediately once the listener is bound. Client connections are
    /// handled in a background tokio task (one spawned task per connection).
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            Self::accept_loop(listener).await;
        });

        Ok(Self { addr, _task: task })
    }

    /// Return the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    // -- internal --

    async fn accept_loop(listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream).await {
                            // In tests, connection errors are expected (e.g. client drops).
                            // Swallow silently.
                            let _ = e;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        let mut joined = false;

        while let Some(msg_result) = read.next().await {
            let msg = msg_result?;

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };

            let ws_msg: WsMessage = serde_json::from_str(&text)?;

            if !joined {
                match &ws_msg {
                    WsMessage::Join(_) => {
                        joined = true;
                        let ack = WsMessage::JoinAck(JoinAckFrame { joined: true });
                        let json = serde_json::to_string(&ack)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    _ => {
                        let error = WsMessage::Error(ErrorFrame {
                            code: error_codes::PROTOCOL_ERROR.to_owned(),
                            message: "first frame must be join".to_owned(),
                            details: None,
                        });
                        let json = serde_json::to_string(&error)?;
                        write.send(Message::Text(json.into())).await?;
                        continue;
                    }
                }
            } else {
                match ws_msg {
                    WsMessage::MessageSend(frame) => {
                        let ack = WsMessage::MessageAck(MessageAckFrame {
                            message_id: uuid::Uuid::new_v4(),
                        });
                        let json = serde_json::to_string(&ack)?;
                        write.send(Message::Text(json.into())).await?;
                        let _ = frame;
                    }
                    WsMessage::Leave(_) => {
                        let ack = WsMessage::LeaveAck(LeaveAckFrame { left: true });
                        let json = serde_json::to_string(&ack)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    WsMessage::Heartbeat(_) => {
                        let hb = WsMessage::Heartbeat(HeartbeatFrame { user_id: None });
                        let json = serde_json::to_string(&hb)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    // Other post-join frames are silently ignored by the mock.
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

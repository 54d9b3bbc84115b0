// C8: socket session manager. One task per connection, owning the
// Handshaking -> Authorized -> Active -> Draining -> Closed state machine
// from §4.7. Inbound frames are handled sequentially; outbound emits arrive
// from the fan-out bus through a bounded channel so a slow client can't
// block other sessions -- only itself, and only up to a timeout before the
// session is closed with `slow-consumer`.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chat_protocol::{
    error_codes, ErrorFrame, HeartbeatFrame, JoinAckFrame, LeaveAckFrame, MessageAckFrame,
    MessageReceiveFrame, PresenceFrame, ReplayResponseFrame, SubmitRequest, WsMessage,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::fanout::{self, FanoutEvent, FanoutSubscription};
use crate::http::submit;
use crate::presence;
use crate::receipts;
use crate::replay::{self, FetchSince};
use crate::repo;
use crate::state::AppState;
use crate::ws_common::{extract_user_id_from_query, send_ws_error, send_ws_message};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(state): State<AppState>,
) -> Response {
    let Some(user_id) = extract_user_id_from_query(&uri) else {
        return (StatusCode::UNAUTHORIZED, "missing user_id").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

struct Session {
    socket_id: String,
    user_id: String,
    joined: HashSet<String>,
}

async fn handle_socket(mut socket: WebSocket, user_id: String, state: AppState) {
    let socket_id = Uuid::new_v4().to_string();

    // Handshaking is folded into the upgrade above (user-id read from the
    // query string); entering here means Authorized begins immediately.
    let mut redis = state.redis.clone();
    let was_offline = match presence::register(
        &mut redis,
        &user_id,
        &socket_id,
        &state.instance_id,
        state.config.presence_ttl_secs,
    )
    .await
    {
        Ok(v) => v,
        Err(e) => {
            warn!(user_id, error = %e, "presence registration failed, closing socket");
            send_ws_error(&mut socket, error_codes::INTERNAL_ERROR, "presence unavailable").await;
            return;
        }
    };
    if was_offline {
        let event = FanoutEvent::Presence {
            user_id: user_id.clone(),
            online: true,
        };
        let _ = fanout::publish(&mut redis, &fanout::user_subject(&user_id), &event).await;
    }

    let mut subscription = FanoutSubscription::new(&state.redis_url);
    if let Err(e) = subscription.subscribe(&fanout::user_subject(&user_id)).await {
        warn!(user_id, error = %e, "failed to subscribe to own subject, closing socket");
        send_ws_error(&mut socket, error_codes::INTERNAL_ERROR, "bus unavailable").await;
        cleanup(&mut redis, &user_id, &socket_id).await;
        return;
    }

    let mut session = Session {
        socket_id: socket_id.clone(),
        user_id: user_id.clone(),
        joined: HashSet::new(),
    };

    info!(user_id, socket_id, "socket session active");
    run_active(&mut socket, &mut session, &mut subscription, &state).await;

    drop(subscription);
    cleanup(&mut redis, &session.user_id, &session.socket_id).await;
    info!(user_id = %session.user_id, socket_id = %session.socket_id, "socket session closed");
}

async fn cleanup(redis: &mut redis::aio::ConnectionManager, user_id: &str, socket_id: &str) {
    match presence::unregister(redis, user_id, socket_id).await {
        Ok(true) => {
            let event = FanoutEvent::Presence {
                user_id: user_id.to_owned(),
                online: false,
            };
            let _ = fanout::publish(redis, &fanout::user_subject(user_id), &event).await;
        }
        Ok(false) => {}
        Err(e) => warn!(user_id, socket_id, error = %e, "presence unregister failed"),
    }
}

async fn run_active(
    socket: &mut WebSocket,
    session: &mut Session,
    subscription: &mut FanoutSubscription,
    state: &AppState,
) {
    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_inbound(socket, session, subscription, state, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read error");
                        break;
                    }
                }
            }
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if !forward_event(socket, session, event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    drain(socket, subscription).await;
}

/// Draining: once the client is gone (or the loop otherwise exits), flush
/// whatever the bus has already queued for a bounded interval rather than
/// dropping it silently.
async fn drain(socket: &mut WebSocket, subscription: &mut FanoutSubscription) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, subscription.recv()).await {
            Ok(Some(event)) => {
                let _ = send_ws_message(socket, &to_outbound(event)).await;
            }
            _ => break,
        }
    }
}

/// Returns `false` when the session should close.
async fn handle_inbound(
    socket: &mut WebSocket,
    session: &mut Session,
    subscription: &mut FanoutSubscription,
    state: &AppState,
    text: &str,
) -> bool {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_ws_error(socket, error_codes::PROTOCOL_ERROR, &format!("malformed frame: {e}")).await;
            return true;
        }
    };

    match msg {
        WsMessage::Join(frame) => {
            let membership = match repo::conversations::check_membership(
                &state.pool,
                &frame.conversation_id,
                &session.user_id,
            )
            .await
            {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "membership check failed during join");
                    send_ws_error(socket, error_codes::INTERNAL_ERROR, "membership check failed").await;
                    return true;
                }
            };
            if !membership.exists || !membership.is_member {
                send_ws_error(socket, error_codes::NOT_CONVERSATION_MEMBER, "not a member of this conversation").await;
                return true;
            }
            if membership.blocked {
                send_ws_error(socket, error_codes::USER_BLOCKED, "blocked from this conversation").await;
                return true;
            }
            if let Err(e) = subscription
                .subscribe(&fanout::conversation_subject(&frame.conversation_id))
                .await
            {
                warn!(error = %e, "failed to subscribe to conversation subject");
                send_ws_error(socket, error_codes::INTERNAL_ERROR, "bus unavailable").await;
                return true;
            }
            session.joined.insert(frame.conversation_id);
            send_ws_message(socket, &WsMessage::JoinAck(JoinAckFrame { joined: true })).await;
        }
        WsMessage::Leave(frame) => {
            subscription.unsubscribe(&fanout::conversation_subject(&frame.conversation_id));
            session.joined.remove(&frame.conversation_id);
            send_ws_message(socket, &WsMessage::LeaveAck(LeaveAckFrame { left: true })).await;
        }
        WsMessage::MessageSend(frame) => {
            let req = SubmitRequest {
                conversation_id: frame.conversation_id,
                sender_id: frame.user_id,
                content: frame.content,
                content_type: frame.content_type.unwrap_or(chat_protocol::ContentType::Text),
                client_message_id: frame.client_message_id,
                recipient_ids: Vec::new(),
                metadata: chat_protocol::MessageMetadata::default(),
            };
            match submit::accept(state, req).await {
                Ok(ack) => {
                    send_ws_message(socket, &WsMessage::MessageAck(MessageAckFrame { message_id: ack.message_id })).await;
                }
                Err(e) => {
                    send_ws_error(socket, e.code(), &e.to_string()).await;
                }
            }
        }
        WsMessage::Receipt(frame) => {
            let message_row = match repo::messages::fetch_by_id(&state.pool, frame.message_id).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    send_ws_error(socket, error_codes::PROTOCOL_ERROR, "unknown message id").await;
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, "message lookup failed during receipt ack");
                    send_ws_error(socket, error_codes::INTERNAL_ERROR, "receipt lookup failed").await;
                    return true;
                }
            };
            let mut redis = state.redis.clone();
            if let Err(e) = receipts::record(
                &state.pool,
                &mut redis,
                frame.message_id,
                &session.user_id,
                frame.state,
                &message_row.sender_id,
            )
            .await
            {
                warn!(error = %e, "failed to record receipt");
                send_ws_error(socket, error_codes::INTERNAL_ERROR, "failed to record receipt").await;
            }
        }
        WsMessage::Typing(frame) => {
            if session.joined.contains(&frame.conversation_id) {
                let subject = fanout::conversation_subject(&frame.conversation_id);
                let event = FanoutEvent::Typing(frame);
                let mut redis = state.redis.clone();
                let _ = fanout::publish(&mut redis, &subject, &event).await;
            }
        }
        WsMessage::Heartbeat(HeartbeatFrame { .. }) => {
            let mut redis = state.redis.clone();
            if let Err(e) = presence::heartbeat(
                &mut redis,
                &session.user_id,
                &session.socket_id,
                state.config.presence_ttl_secs,
            )
            .await
            {
                warn!(error = %e, "heartbeat failed");
            }
        }
        WsMessage::Replay(frame) => {
            let mut redis = state.redis.clone();
            let response = match replay::fetch_since(&mut redis, &frame.conversation_id, frame.after_message_id).await {
                Ok(FetchSince::Envelopes(envelopes)) => ReplayResponseFrame {
                    conversation_id: frame.conversation_id,
                    envelopes,
                    window_exceeded: false,
                },
                Ok(FetchSince::WindowExceeded) => ReplayResponseFrame {
                    conversation_id: frame.conversation_id,
                    envelopes: Vec::new(),
                    window_exceeded: true,
                },
                Err(e) => {
                    warn!(error = %e, "replay fetch failed");
                    send_ws_error(socket, error_codes::INTERNAL_ERROR, "replay unavailable").await;
                    return true;
                }
            };
            send_ws_message(socket, &WsMessage::ReplayResponse(response)).await;
        }
        WsMessage::JoinAck(_)
        | WsMessage::LeaveAck(_)
        | WsMessage::MessageAck(_)
        | WsMessage::MessageReceive(_)
        | WsMessage::ReplayResponse(_)
        | WsMessage::Presence(_)
        | WsMessage::Error(_) => {
            send_ws_error(socket, error_codes::PROTOCOL_ERROR, "server-only frame sent by client").await;
        }
    }
    true
}

fn to_outbound(event: FanoutEvent) -> WsMessage {
    match event {
        FanoutEvent::MessageReceive(envelope) => WsMessage::MessageReceive(MessageReceiveFrame {
            conversation_id: envelope.conversation_id,
            message_id: envelope.message_id,
            sender: envelope.sender_id,
            content: envelope.content,
            ts: envelope.accepted_at,
        }),
        FanoutEvent::Presence { user_id, online } => WsMessage::Presence(PresenceFrame { user_id, online }),
        FanoutEvent::Typing(frame) => WsMessage::Typing(frame),
        FanoutEvent::ReceiptUpdate { .. } => {
            // No wire frame carries receipt state (see §6's socket protocol
            // table); receipt progression is observed through history reads.
            WsMessage::Error(ErrorFrame {
                code: error_codes::INTERNAL_ERROR,
                message: "unreachable".to_owned(),
                details: None,
            })
        }
    }
}

/// Returns `false` when the session should close (slow consumer).
async fn forward_event(socket: &mut WebSocket, session: &Session, event: FanoutEvent) -> bool {
    if let FanoutEvent::ReceiptUpdate { .. } = event {
        return true;
    }
    if let FanoutEvent::Typing(frame) = &event {
        if frame.user_id == session.user_id {
            return true;
        }
    }

    let outbound = to_outbound(event);
    match tokio::time::timeout(SEND_TIMEOUT, send_ws_message(socket, &outbound)).await {
        Ok(true) => true,
        Ok(false) => false,
        Err(_) => {
            warn!(user_id = %session.user_id, socket_id = %session.socket_id, "slow consumer, closing session");
            send_ws_error(socket, error_codes::SLOW_CONSUMER, "client too slow to drain outbound events").await;
            false
        }
    }
}

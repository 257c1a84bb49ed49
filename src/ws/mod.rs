//! WebSocket Gateway
//!
//! Real-time signaling and room events over JSON-over-WebSocket.
//!
//! ## Authentication
//!
//! The handshake carries the bearer token in the `Sec-WebSocket-Protocol`
//! header (`access_token.<jwt>`) so it never lands in logs or browser
//! history; a `?token=` query parameter is accepted as a fallback for
//! clients that cannot set protocols. A failed handshake closes with
//! `Authentication error`. The verified user identity is pinned to the
//! socket for its whole lifetime; events are never re-authenticated.
//!
//! ## Wire format
//!
//! Each frame is one JSON object tagged by `event`, one enum variant per
//! event name. Undecodable frames are dropped with a log line.

mod handlers;
pub mod rooms;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::jwt;
use crate::db::users;

/// WebSocket protocol prefix for handshake authentication.
const WS_PROTOCOL_PREFIX: &str = "access_token.";

/// Client-to-server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Enter a meeting room.
    JoinMeeting { meeting_id: String },
    /// WebRTC offer, relayed opaquely.
    Offer {
        meeting_id: String,
        /// Target user ID (preferred) or socket ID. Absent means legacy
        /// room broadcast.
        to: Option<String>,
        data: serde_json::Value,
        from: Option<String>,
    },
    /// WebRTC answer, relayed opaquely.
    Answer {
        meeting_id: String,
        to: Option<String>,
        data: serde_json::Value,
        from: Option<String>,
    },
    /// ICE candidate, relayed opaquely.
    IceCandidate {
        meeting_id: String,
        to: Option<String>,
        data: serde_json::Value,
        from: Option<String>,
    },
    /// Microphone state change.
    ToggleAudio {
        meeting_id: String,
        audio_enabled: bool,
        user_id: Option<Uuid>,
    },
    /// Camera state change.
    ToggleVideo {
        meeting_id: String,
        video_enabled: bool,
        user_id: Option<Uuid>,
    },
    /// Screen share state change.
    ScreenShare {
        meeting_id: String,
        stream_id: Option<String>,
        active: bool,
        user_id: Option<Uuid>,
    },
    /// Chat message (persisted, then fanned out to the full room).
    ChatMessage { meeting_id: String, message: String },
    /// Host control: mute a participant.
    MuteParticipant {
        meeting_id: String,
        participant_id: String,
    },
    /// Host control: remove a participant.
    RemoveParticipant {
        meeting_id: String,
        participant_id: String,
    },
    /// Hand raise/lower.
    RaiseHand {
        meeting_id: String,
        raised: bool,
        od_id: Option<String>,
        username: Option<String>,
    },
    /// Emoji reaction.
    Reaction { meeting_id: String, emoji: String },
    /// Leave the meeting room.
    LeaveMeeting { meeting_id: String },
}

/// One entry of the existing-participants bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingParticipant {
    pub socket_id: Uuid,
    /// The participant's user ID.
    pub od_id: Uuid,
    pub username: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A peer joined the room (sent to everyone else). The joiner, not the
    /// recipients, initiates offers; recipients only answer.
    UserJoined {
        socket_id: Uuid,
        od_id: Uuid,
        username: String,
    },
    /// A peer left the room.
    UserLeft { socket_id: Uuid, od_id: Uuid },
    /// Room snapshot, sent only to the joining socket.
    ExistingParticipants { participants: Vec<ExistingParticipant> },
    /// Routed WebRTC offer.
    Offer {
        meeting_id: String,
        data: serde_json::Value,
        from: String,
    },
    /// Routed WebRTC answer.
    Answer {
        meeting_id: String,
        data: serde_json::Value,
        from: String,
    },
    /// Routed ICE candidate.
    IceCandidate {
        meeting_id: String,
        data: serde_json::Value,
        from: String,
    },
    /// Microphone state broadcast.
    AudioToggled {
        meeting_id: String,
        audio_enabled: bool,
        user_id: Uuid,
    },
    /// Camera state broadcast.
    VideoToggled {
        meeting_id: String,
        video_enabled: bool,
        user_id: Uuid,
    },
    /// Screen share broadcast.
    ScreenShare {
        meeting_id: String,
        stream_id: Option<String>,
        active: bool,
        user_id: Uuid,
    },
    /// Chat fan-out, full room including the sender (the echo doubles as a
    /// durable receipt).
    ChatMessage {
        meeting_id: String,
        #[serde(flatten)]
        message: crate::db::ChatMessage,
    },
    /// Host muted this client.
    MutedByHost { meeting_id: String },
    /// Host removed this client; the client disconnects itself.
    RemovedFromMeeting { meeting_id: String },
    /// Hand raise broadcast.
    HandRaised {
        meeting_id: String,
        raised: bool,
        od_id: String,
        username: String,
    },
    /// Reaction broadcast.
    Reaction {
        meeting_id: String,
        emoji: String,
        user_id: Uuid,
    },
    /// Soft error; the socket stays open.
    Error { message: String },
}

/// Identity pinned to one socket connection.
#[derive(Debug, Clone)]
pub struct SocketUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

/// Where the handshake token came from; protocol-header handshakes must be
/// answered with the matching subprotocol.
enum TokenSource {
    Protocol,
    Query,
}

/// Extract the bearer token from the handshake: `Sec-WebSocket-Protocol`
/// preferred, `?token=` query fallback.
fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<(String, TokenSource)> {
    let from_protocol = headers
        .get("sec-websocket-protocol")
        .and_then(|h| h.to_str().ok())
        .and_then(|protocols| {
            protocols
                .split(',')
                .map(str::trim)
                .find(|p| p.starts_with(WS_PROTOCOL_PREFIX))
                .map(|p| p[WS_PROTOCOL_PREFIX.len()..].to_string())
        });
    if let Some(token) = from_protocol {
        return Some((token, TokenSource::Protocol));
    }

    query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(ToString::to_string))
            .map(|token| (token, TokenSource::Query))
    })
}

/// Build a plain-text error response without panicking.
fn error_response(status: u16, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(500)
                .body("Internal Server Error".into())
                .expect("fallback response builder")
        })
}

/// WebSocket upgrade handler.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let Some((token, source)) = extract_token(&headers, query.as_deref()) else {
        return error_response(401, "Authentication error");
    };

    let claims = match jwt::validate_token(&token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => return error_response(401, "Authentication error"),
    };
    let user_id = match jwt::user_id_from_claims(&claims) {
        Ok(id) => id,
        Err(_) => return error_response(401, "Authentication error"),
    };

    // Resolve the user once; the socket reuses this identity for its
    // whole lifetime.
    let user = match users::find_user_by_id(&state.db, user_id).await {
        Ok(Some(user)) if user.is_active => SocketUser {
            id: user.id,
            display_name: user.display_name().to_string(),
            avatar: user.profile.0.avatar.clone(),
            username: user.username,
        },
        Ok(_) => return error_response(401, "Authentication error"),
        Err(e) => {
            error!(error = %e, "User lookup failed during WS handshake");
            return error_response(500, "Internal Server Error");
        }
    };

    let upgrade = match source {
        // Echo the protocol to complete the handshake (required when the
        // client authenticated via Sec-WebSocket-Protocol).
        TokenSource::Protocol => ws.protocols(["access_token"]),
        TokenSource::Query => ws,
    };
    upgrade.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Per-connection loop: one forwarding task for outbound events, inline
/// handling for inbound events.
async fn handle_socket(socket: WebSocket, state: AppState, user: SocketUser) {
    let socket_id = Uuid::now_v7();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound channel; per-sender ordering is the channel's FIFO.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(100);

    info!(socket_id = %socket_id, user_id = %user.id, "WebSocket connected");

    let sender_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let msg = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // The room this socket currently sits in (`socket.meetingId`).
    let mut current_meeting: Option<String> = None;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event: ClientEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        // Unknown or malformed events are dropped, not fatal.
                        debug!(socket_id = %socket_id, error = %e, "Dropping undecodable client event");
                        continue;
                    }
                };

                if let Err(e) =
                    handlers::handle_event(&state, socket_id, &user, &tx, &mut current_meeting, event)
                        .await
                {
                    warn!(socket_id = %socket_id, error = %e, "Client event failed");
                    let _ = tx
                        .send(ServerEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            Ok(Message::Close(_)) => {
                info!(socket_id = %socket_id, user_id = %user.id, "WebSocket closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(socket_id = %socket_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnect cleanup: leave the room and tell the others.
    if let Some(meeting_id) = current_meeting.take() {
        handlers::handle_disconnect(&state, socket_id, &user, &meeting_id).await;
    }

    sender_handle.abort();
    info!(socket_id = %socket_id, user_id = %user.id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_protocol_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            "access_token.abc.def.ghi".parse().unwrap(),
        );
        let (token, source) = extract_token(&headers, None).unwrap();
        assert_eq!(token, "abc.def.ghi");
        assert!(matches!(source, TokenSource::Protocol));
    }

    #[test]
    fn test_extract_token_from_query_fallback() {
        let headers = HeaderMap::new();
        let (token, source) = extract_token(&headers, Some("token=abc.def.ghi&x=1")).unwrap();
        assert_eq!(token, "abc.def.ghi");
        assert!(matches!(source, TokenSource::Query));
        assert!(extract_token(&headers, Some("x=1")).is_none());
    }

    #[test]
    fn test_client_event_wire_names() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"join-meeting","meetingId":"ABC-123-XYZ"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::JoinMeeting { meeting_id } if meeting_id == "ABC-123-XYZ"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"ice-candidate","meetingId":"ABC-123-XYZ","to":"x","data":{"candidate":"..."},"from":null}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::IceCandidate { .. }));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let event = ServerEvent::UserJoined {
            socket_id: Uuid::nil(),
            od_id: Uuid::nil(),
            username: "ada".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "user-joined");
        assert!(json.get("odId").is_some());
        assert!(json.get("socketId").is_some());
    }

    #[test]
    fn test_chat_message_event_flattens_payload() {
        use crate::db::{ChatMessage, ChatMessageType, ChatSender};
        let event = ServerEvent::ChatMessage {
            meeting_id: "ABC-123-XYZ".into(),
            message: ChatMessage {
                sender: ChatSender {
                    id: Uuid::nil(),
                    username: "ada".into(),
                    avatar: None,
                },
                message: "hi".into(),
                message_type: ChatMessageType::Text,
                timestamp: chrono::Utc::now(),
                file: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "chat-message");
        assert_eq!(json["type"], "text");
        assert_eq!(json["message"], "hi");
        assert_eq!(json["sender"]["username"], "ada");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"event":"warp-drive","meetingId":"ABC-123-XYZ"}"#);
        assert!(result.is_err());
    }
}

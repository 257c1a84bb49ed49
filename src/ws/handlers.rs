//! Socket Event Handlers
//!
//! The signaling router and room event bus. Signaling payloads (SDP, ICE)
//! are opaque pass-through; the server never inspects them. Broadcasts are
//! best-effort, at-most-once; clients reconcile via REST on reconnect.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::db::{meetings as repo, ChatMessage, ChatMessageType, ChatSender};
use crate::error::{ApiError, ApiResult};
use crate::meetings::permissions;

use super::rooms::RoomMember;
use super::{ClientEvent, ExistingParticipant, ServerEvent, SocketUser};

/// Dispatch one inbound client event.
pub async fn handle_event(
    state: &AppState,
    socket_id: Uuid,
    user: &SocketUser,
    tx: &mpsc::Sender<ServerEvent>,
    current_meeting: &mut Option<String>,
    event: ClientEvent,
) -> ApiResult<()> {
    match event {
        ClientEvent::JoinMeeting { meeting_id } => {
            handle_join(state, socket_id, user, tx, current_meeting, meeting_id).await
        }
        ClientEvent::LeaveMeeting { meeting_id } => {
            handle_leave(state, socket_id, user, current_meeting, &meeting_id).await;
            Ok(())
        }

        ClientEvent::Offer {
            meeting_id,
            to,
            data,
            ..
        } => {
            relay(state, socket_id, user, &meeting_id, to.as_deref(), |from| {
                ServerEvent::Offer {
                    meeting_id: meeting_id.clone(),
                    data: data.clone(),
                    from,
                }
            })
            .await;
            Ok(())
        }
        ClientEvent::Answer {
            meeting_id,
            to,
            data,
            ..
        } => {
            relay(state, socket_id, user, &meeting_id, to.as_deref(), |from| {
                ServerEvent::Answer {
                    meeting_id: meeting_id.clone(),
                    data: data.clone(),
                    from,
                }
            })
            .await;
            Ok(())
        }
        ClientEvent::IceCandidate {
            meeting_id,
            to,
            data,
            ..
        } => {
            relay(state, socket_id, user, &meeting_id, to.as_deref(), |from| {
                ServerEvent::IceCandidate {
                    meeting_id: meeting_id.clone(),
                    data: data.clone(),
                    from,
                }
            })
            .await;
            Ok(())
        }

        ClientEvent::ToggleAudio {
            meeting_id,
            audio_enabled,
            ..
        } => {
            state
                .rooms
                .broadcast_except(
                    &meeting_id,
                    socket_id,
                    ServerEvent::AudioToggled {
                        meeting_id: meeting_id.clone(),
                        audio_enabled,
                        user_id: user.id,
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::ToggleVideo {
            meeting_id,
            video_enabled,
            ..
        } => {
            state
                .rooms
                .broadcast_except(
                    &meeting_id,
                    socket_id,
                    ServerEvent::VideoToggled {
                        meeting_id: meeting_id.clone(),
                        video_enabled,
                        user_id: user.id,
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::ScreenShare {
            meeting_id,
            stream_id,
            active,
            ..
        } => {
            state
                .rooms
                .broadcast_except(
                    &meeting_id,
                    socket_id,
                    ServerEvent::ScreenShare {
                        meeting_id: meeting_id.clone(),
                        stream_id,
                        active,
                        user_id: user.id,
                    },
                )
                .await;
            Ok(())
        }

        ClientEvent::RaiseHand {
            meeting_id,
            raised,
            od_id,
            username,
        } => {
            state
                .rooms
                .broadcast(
                    &meeting_id,
                    ServerEvent::HandRaised {
                        meeting_id: meeting_id.clone(),
                        raised,
                        od_id: od_id.unwrap_or_else(|| user.id.to_string()),
                        username: username.unwrap_or_else(|| user.display_name.clone()),
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::Reaction { meeting_id, emoji } => {
            state
                .rooms
                .broadcast(
                    &meeting_id,
                    ServerEvent::Reaction {
                        meeting_id: meeting_id.clone(),
                        emoji,
                        user_id: user.id,
                    },
                )
                .await;
            Ok(())
        }

        ClientEvent::ChatMessage {
            meeting_id,
            message,
        } => handle_chat(state, user, &meeting_id, message).await,

        ClientEvent::MuteParticipant {
            meeting_id,
            participant_id,
        } => {
            handle_host_control(
                state,
                user,
                &meeting_id,
                &participant_id,
                HostControl::Mute,
            )
            .await
        }
        ClientEvent::RemoveParticipant {
            meeting_id,
            participant_id,
        } => {
            handle_host_control(
                state,
                user,
                &meeting_id,
                &participant_id,
                HostControl::Remove,
            )
            .await
        }
    }
}

/// Enter a room: register the socket, record presence, announce to the
/// room, and hand the joiner the existing-participants snapshot.
///
/// The snapshot contract avoids glare: the joiner initiates offers to each
/// existing member; existing members only answer.
async fn handle_join(
    state: &AppState,
    socket_id: Uuid,
    user: &SocketUser,
    tx: &mpsc::Sender<ServerEvent>,
    current_meeting: &mut Option<String>,
    meeting_id: String,
) -> ApiResult<()> {
    // Sockets may not join rooms of ended or cancelled meetings.
    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;
    if meeting.status.is_terminal() {
        return Err(ApiError::Gone("Meeting is over".to_string()));
    }

    // Snapshot the room before adding ourselves.
    let existing = state.rooms.members(&meeting_id).await;

    state
        .rooms
        .join(
            &meeting_id,
            socket_id,
            RoomMember {
                user_id: user.id,
                username: user.display_name.clone(),
                joined_at: Utc::now(),
                sender: tx.clone(),
            },
        )
        .await;
    *current_meeting = Some(meeting_id.clone());

    // Presence is advisory; the in-memory room map stays authoritative.
    state
        .cache
        .add_online_user(&meeting_id, user.id, socket_id)
        .await;

    state
        .rooms
        .broadcast_except(
            &meeting_id,
            socket_id,
            ServerEvent::UserJoined {
                socket_id,
                od_id: user.id,
                username: user.display_name.clone(),
            },
        )
        .await;

    let participants = existing
        .into_iter()
        .map(|m| ExistingParticipant {
            socket_id: m.socket_id,
            od_id: m.user_id,
            username: m.username,
        })
        .collect();
    let _ = tx
        .send(ServerEvent::ExistingParticipants { participants })
        .await;

    info!(meeting_id = %meeting_id, user_id = %user.id, socket_id = %socket_id, "Socket joined meeting room");
    Ok(())
}

/// Explicit leave-meeting event.
async fn handle_leave(
    state: &AppState,
    socket_id: Uuid,
    user: &SocketUser,
    current_meeting: &mut Option<String>,
    meeting_id: &str,
) {
    handle_disconnect(state, socket_id, user, meeting_id).await;
    if current_meeting.as_deref() == Some(meeting_id) {
        *current_meeting = None;
    }
}

/// Remove the socket from its room and fan out `user-left`.
pub async fn handle_disconnect(
    state: &AppState,
    socket_id: Uuid,
    user: &SocketUser,
    meeting_id: &str,
) {
    if state.rooms.leave(meeting_id, socket_id).await.is_some() {
        state
            .rooms
            .broadcast(
                meeting_id,
                ServerEvent::UserLeft {
                    socket_id,
                    od_id: user.id,
                },
            )
            .await;
    }
    state.cache.remove_online_user(meeting_id, user.id).await;
    info!(meeting_id = %meeting_id, user_id = %user.id, "Socket left meeting room");
}

/// Route a signaling event. With a target, unicast to that one socket
/// stamped with the sender; without one, legacy room broadcast. A missing
/// target drops silently; clients reconcile over REST.
async fn relay<F>(
    state: &AppState,
    socket_id: Uuid,
    user: &SocketUser,
    meeting_id: &str,
    to: Option<&str>,
    build: F,
) where
    F: Fn(String) -> ServerEvent,
{
    let event = build(user.id.to_string());

    match to {
        Some(target) => {
            let Some(target_socket) = state.rooms.find_target(meeting_id, target).await else {
                debug!(meeting_id = %meeting_id, target = %target, "Signaling target not found, dropping");
                return;
            };
            if !state
                .rooms
                .send_to_socket(meeting_id, target_socket, event)
                .await
            {
                debug!(meeting_id = %meeting_id, target = %target, "Signaling send failed, dropping");
            }
        }
        None => {
            // Legacy path: clients should always populate `to`.
            state
                .rooms
                .broadcast_except(meeting_id, socket_id, event)
                .await;
        }
    }
}

/// Chat over the socket: permission check, persist, then fan out to the
/// full room including the sender. The HTTP chat endpoint produces the
/// identical event.
async fn handle_chat(
    state: &AppState,
    user: &SocketUser,
    meeting_id: &str,
    message: String,
) -> ApiResult<()> {
    let meeting = repo::find_by_public_id(&state.db, meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if !permissions::can_chat(&meeting, user.id) {
        return Err(ApiError::Forbidden(
            "Chat is disabled in this meeting".to_string(),
        ));
    }

    let chat_message = ChatMessage {
        sender: ChatSender {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        },
        message,
        message_type: ChatMessageType::Text,
        timestamp: Utc::now(),
        file: None,
    };

    // Persist before broadcast so a REST read after delivery always sees
    // the message.
    repo::push_chat(&state.db, meeting_id, &chat_message).await?;

    state
        .rooms
        .broadcast(
            meeting_id,
            ServerEvent::ChatMessage {
                meeting_id: meeting_id.to_string(),
                message: chat_message,
            },
        )
        .await;
    Ok(())
}

enum HostControl {
    Mute,
    Remove,
}

/// Host-only control actions targeting one participant's socket.
async fn handle_host_control(
    state: &AppState,
    user: &SocketUser,
    meeting_id: &str,
    participant_id: &str,
    control: HostControl,
) -> ApiResult<()> {
    let meeting = repo::find_by_public_id(&state.db, meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    let allowed = match control {
        HostControl::Mute => permissions::can_mute_others(&meeting, user.id),
        HostControl::Remove => permissions::can_remove_others(&meeting, user.id),
    };
    if !allowed {
        return Err(ApiError::Forbidden(
            "You are not allowed to control participants".to_string(),
        ));
    }

    let Some(target_socket) = state.rooms.find_target(meeting_id, participant_id).await else {
        warn!(meeting_id = %meeting_id, target = %participant_id, "Control target not connected");
        return Ok(());
    };

    let event = match control {
        HostControl::Mute => ServerEvent::MutedByHost {
            meeting_id: meeting_id.to_string(),
        },
        HostControl::Remove => ServerEvent::RemovedFromMeeting {
            meeting_id: meeting_id.to_string(),
        },
    };
    state
        .rooms
        .send_to_socket(meeting_id, target_socket, event)
        .await;
    Ok(())
}

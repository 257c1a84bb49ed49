//! Chat
//!
//! REST chat surface. Messages sent here persist through the same
//! repository append and fan out the same `chat-message` socket event as
//! the socket path, so REST-originated messages are indistinguishable to
//! connected clients.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::{ok, ApiResponse, AppState};
use crate::auth::{require_auth, AuthUser};
use crate::db::{meetings as repo, ChatFile, ChatMessage, ChatMessageType, ChatSender};
use crate::error::{ApiError, ApiResult};
use crate::meetings::permissions;
use crate::ws::ServerEvent;

/// Create the chat router. Every route requires a bearer token.
pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.max_chat_upload_size;

    Router::new()
        .route("/message", post(send_message))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/{meeting_id}", get(history))
        .layer(axum_middleware::from_fn_with_state(state, require_auth))
}

/// Send request body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub meeting_id: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_page() -> i64 {
    1
}

const fn default_limit() -> i64 {
    50
}

/// Reverse-chronological page of chat history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub messages: Vec<ChatMessage>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Persist a chat message and fan it out to the room, sender included.
async fn persist_and_broadcast(
    state: &AppState,
    meeting_id: &str,
    message: ChatMessage,
) -> ApiResult<ChatMessage> {
    repo::push_chat(&state.db, meeting_id, &message).await?;

    state
        .rooms
        .broadcast(
            meeting_id,
            ServerEvent::ChatMessage {
                meeting_id: meeting_id.to_string(),
                message: message.clone(),
            },
        )
        .await;
    Ok(message)
}

/// Send a text message.
///
/// POST /api/chat/message
pub async fn send_message(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<Json<ApiResponse<ChatMessage>>> {
    body.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let meeting = repo::find_by_public_id(&state.db, &body.meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if !permissions::can_chat(&meeting, auth_user.id) {
        return Err(ApiError::Forbidden(
            "Chat is disabled in this meeting".to_string(),
        ));
    }

    let message = ChatMessage {
        sender: ChatSender {
            id: auth_user.id,
            username: auth_user.username.clone(),
            avatar: auth_user.avatar.clone(),
        },
        message: body.message,
        message_type: ChatMessageType::Text,
        timestamp: Utc::now(),
        file: None,
    };

    let message = persist_and_broadcast(&state, &body.meeting_id, message).await?;
    Ok(ok("Message sent", message))
}

/// Upload a chat attachment (multipart, `meetingId` + `file` fields,
/// 10 MB cap enforced by the body limit layer).
///
/// POST /api/chat/upload
pub async fn upload(
    State(state): State<AppState>,
    auth_user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<ChatMessage>>> {
    let mut meeting_id: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("meetingId") => {
                meeting_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                let filename = sanitize_filename(field.file_name().unwrap_or("attachment"));
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Upload failed: {e}")))?;
                file = Some((filename, mime_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let meeting_id =
        meeting_id.ok_or_else(|| ApiError::BadRequest("meetingId is required".to_string()))?;
    let (filename, mime_type, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;

    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;
    if !permissions::can_chat(&meeting, auth_user.id) {
        return Err(ApiError::Forbidden(
            "Chat is disabled in this meeting".to_string(),
        ));
    }

    // Store under a fresh name; the original stays in the message.
    let stored_name = format!("{}-{}", Uuid::now_v7(), filename);
    let dir = std::path::Path::new(&state.config.upload_dir).join("chat");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(ApiError::internal)?;
    let size = bytes.len() as i64;
    tokio::fs::write(dir.join(&stored_name), bytes)
        .await
        .map_err(ApiError::internal)?;

    info!(meeting_id = %meeting_id, filename = %filename, size, "Chat attachment stored");

    let message = ChatMessage {
        sender: ChatSender {
            id: auth_user.id,
            username: auth_user.username.clone(),
            avatar: auth_user.avatar.clone(),
        },
        message: filename.clone(),
        message_type: ChatMessageType::File,
        timestamp: Utc::now(),
        file: Some(ChatFile {
            filename,
            url: format!("/uploads/chat/{stored_name}"),
            size,
            mime_type,
        }),
    };

    let message = persist_and_broadcast(&state, &meeting_id, message).await?;
    Ok(ok("File uploaded", message))
}

/// Reverse-chronological chat history page.
///
/// GET /api/chat/{meetingId}
pub async fn history(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<ApiResponse<ChatPage>>> {
    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if meeting.participant(auth_user.id).is_none() {
        return Err(ApiError::Forbidden(
            "Only participants can read chat history".to_string(),
        ));
    }

    let limit = query.limit.clamp(1, 200) as usize;
    let page = query.page.max(1) as usize;
    let total = meeting.chat.len() as i64;

    let messages: Vec<ChatMessage> = meeting
        .chat
        .0
        .into_iter()
        .rev()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Ok(ok(
        "Chat history",
        ChatPage {
            messages,
            total,
            page: page as i64,
            limit: limit as i64,
        },
    ))
}

/// Keep the base name only, drop path separators and control characters.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '\0')
        .take(120)
        .collect();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
    }
}

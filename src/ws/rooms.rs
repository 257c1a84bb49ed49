//! Room Registry
//!
//! Transient, in-memory membership for one meeting: a map from socket ID to
//! member info plus the socket's outbound channel. Rooms are created on
//! first join and dropped when the last socket leaves; nothing here is ever
//! persisted. Presence in the cache store is advisory; this map is the
//! source of truth for fan-out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::ServerEvent;

/// One connected socket inside a room.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub user_id: Uuid,
    pub username: String,
    pub joined_at: DateTime<Utc>,
    /// Outbound channel to the socket's forwarding task. Per-sender event
    /// order is preserved by the channel.
    pub sender: mpsc::Sender<ServerEvent>,
}

/// Snapshot of a member for the existing-participants bootstrap.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub socket_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Default)]
struct Room {
    members: HashMap<Uuid, RoomMember>,
}

/// Registry of all active rooms, keyed by public meeting code.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket to a room, creating the room if needed.
    pub async fn join(&self, meeting_id: &str, socket_id: Uuid, member: RoomMember) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(meeting_id.to_string()).or_default();
        room.members.insert(socket_id, member);
        debug!(
            meeting_id = %meeting_id,
            socket_id = %socket_id,
            members = room.members.len(),
            "Socket joined room"
        );
    }

    /// Remove a socket from a room. The room is dropped when empty.
    /// Returns the removed member, if the socket was present.
    pub async fn leave(&self, meeting_id: &str, socket_id: Uuid) -> Option<RoomMember> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(meeting_id)?;
        let member = room.members.remove(&socket_id);
        if room.members.is_empty() {
            rooms.remove(meeting_id);
            debug!(meeting_id = %meeting_id, "Room dropped (empty)");
        }
        member
    }

    /// Snapshot the members of a room.
    pub async fn members(&self, meeting_id: &str) -> Vec<MemberInfo> {
        let rooms = self.rooms.read().await;
        rooms
            .get(meeting_id)
            .map(|room| {
                room.members
                    .iter()
                    .map(|(socket_id, m)| MemberInfo {
                        socket_id: *socket_id,
                        user_id: m.user_id,
                        username: m.username.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Broadcast an event to every socket in a room.
    pub async fn broadcast(&self, meeting_id: &str, event: ServerEvent) {
        let senders = self.collect_senders(meeting_id, None).await;
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    /// Broadcast an event to every socket in a room except one.
    pub async fn broadcast_except(&self, meeting_id: &str, except: Uuid, event: ServerEvent) {
        let senders = self.collect_senders(meeting_id, Some(except)).await;
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    /// Unicast an event to one socket in a room. Returns false if the
    /// socket is not in the room (callers drop silently).
    pub async fn send_to_socket(&self, meeting_id: &str, socket_id: Uuid, event: ServerEvent) -> bool {
        let sender = {
            let rooms = self.rooms.read().await;
            rooms
                .get(meeting_id)
                .and_then(|room| room.members.get(&socket_id))
                .map(|m| m.sender.clone())
        };
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Resolve a signaling target: user ID match preferred, socket ID as
    /// fallback (clients may address either).
    pub async fn find_target(&self, meeting_id: &str, target: &str) -> Option<Uuid> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(meeting_id)?;

        if let Ok(user_id) = target.parse::<Uuid>() {
            if let Some(socket_id) = room
                .members
                .iter()
                .find(|(_, m)| m.user_id == user_id)
                .map(|(socket_id, _)| *socket_id)
            {
                return Some(socket_id);
            }
            // Fall back to a direct socket ID match.
            if room.members.contains_key(&user_id) {
                return Some(user_id);
            }
        }
        None
    }

    /// Number of active rooms (diagnostics).
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // Clone senders out of the lock so sends never hold it across an await.
    async fn collect_senders(
        &self,
        meeting_id: &str,
        except: Option<Uuid>,
    ) -> Vec<mpsc::Sender<ServerEvent>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(meeting_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter(|(socket_id, _)| Some(**socket_id) != except)
                    .map(|(_, m)| m.sender.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: Uuid) -> (RoomMember, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            RoomMember {
                user_id,
                username: "ada".into(),
                joined_at: Utc::now(),
                sender: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let registry = RoomRegistry::new();
        let socket = Uuid::now_v7();
        let (m, _rx) = member(Uuid::now_v7());

        registry.join("ABC-123-XYZ", socket, m).await;
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.members("ABC-123-XYZ").await.len(), 1);

        assert!(registry.leave("ABC-123-XYZ", socket).await.is_some());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let registry = RoomRegistry::new();
        let (socket_a, socket_b) = (Uuid::now_v7(), Uuid::now_v7());
        let (member_a, mut rx_a) = member(Uuid::now_v7());
        let (member_b, mut rx_b) = member(Uuid::now_v7());

        registry.join("ABC-123-XYZ", socket_a, member_a).await;
        registry.join("ABC-123-XYZ", socket_b, member_b).await;

        registry
            .broadcast_except(
                "ABC-123-XYZ",
                socket_a,
                ServerEvent::Reaction {
                    meeting_id: "ABC-123-XYZ".into(),
                    emoji: "🎉".into(),
                    user_id: Uuid::now_v7(),
                },
            )
            .await;

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_find_target_prefers_user_id() {
        let registry = RoomRegistry::new();
        let socket = Uuid::now_v7();
        let user = Uuid::now_v7();
        let (m, _rx) = member(user);
        registry.join("ABC-123-XYZ", socket, m).await;

        // By user ID.
        assert_eq!(
            registry
                .find_target("ABC-123-XYZ", &user.to_string())
                .await,
            Some(socket)
        );
        // By socket ID.
        assert_eq!(
            registry
                .find_target("ABC-123-XYZ", &socket.to_string())
                .await,
            Some(socket)
        );
        // Unknown target drops.
        assert!(registry
            .find_target("ABC-123-XYZ", &Uuid::now_v7().to_string())
            .await
            .is_none());
    }
}

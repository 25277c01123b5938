//! Protocol types for the chat system
//!
//! Inbound commands and outbound events are closed tagged unions (tag
//! `type`, kebab-case) so the fan-out contract is statically checkable.
//! Uses serde for JSON serialization.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::generate_id;

/// Unique identifier types
pub type UserId = String;
pub type RoomId = String;
pub type MessageId = String;

/// Room-id prefix marking a stream-bound (eviction-exempt) room
pub const STREAM_ROOM_PREFIX: &str = "stream_";

/// Roles whose holders may apply moderation actions
pub const MODERATOR_ROLES: [&str; 3] = ["moderator", "admin", "broadcaster"];

/// Role required to speak in subscriber-only rooms
pub const ROLE_SUBSCRIBER: &str = "subscriber";

/// Derive the deterministic room id for a stream key
pub fn stream_room_id(stream_key: &str) -> RoomId {
    format!("{}{}", STREAM_ROOM_PREFIX, stream_key)
}

// =============================================================================
// Identity and membership
// =============================================================================

/// Identity bound to a connection for its lifetime
///
/// Supplied by the caller (the auth layer upstream verifies credentials and
/// hands over the role set); this core trusts it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub roles: HashSet<String>,
    /// Preferred display color, assigned from the palette when absent
    pub color: Option<String>,
}

impl Identity {
    pub fn is_moderator(&self) -> bool {
        MODERATOR_ROLES.iter().any(|r| self.roles.contains(*r))
    }
}

/// Public projection of a room member (safe to broadcast)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub color: String,
}

/// Room-scoped membership record
///
/// Exists only while the user is a member of that specific room; re-joining
/// recreates it from the connection identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUser {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub roles: HashSet<String>,
    /// When the user joined this room (unix ms)
    pub joined_at: u64,
    /// Terminal for this room once set; the entry is removed right after
    pub banned: bool,
    pub muted: bool,
    /// Mute expiry (unix ms); checked lazily at the next send attempt
    pub mute_expires_at: Option<u64>,
    pub color: String,
}

impl ChatUser {
    pub fn is_moderator(&self) -> bool {
        MODERATOR_ROLES.iter().any(|r| self.roles.contains(*r))
    }

    pub fn is_subscriber(&self) -> bool {
        self.roles.contains(ROLE_SUBSCRIBER)
    }

    pub fn public(&self) -> PublicUser {
        PublicUser {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            color: self.color.clone(),
        }
    }

    pub fn sender_snapshot(&self) -> MessageSender {
        MessageSender {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            color: self.color.clone(),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Message classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Regular user chat message
    Message,
    /// Join/leave/welcome notices
    System,
    /// Moderation notices
    Moderation,
}

/// Author snapshot taken at send time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSender {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub color: String,
}

/// A chat message as archived and broadcast
///
/// Immutable once broadcast, except moderator-initiated redaction which
/// rewrites `body` and sets the moderated flag in place. The record is
/// retained so history length and ordering are unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    /// None for system/moderation notices
    pub sender: Option<MessageSender>,
    pub body: String,
    /// Unix ms
    pub timestamp: u64,
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
    pub moderated: bool,
    pub moderation_reason: Option<String>,
}

impl ChatMessage {
    /// Build a user message
    pub fn user(
        room_id: &str,
        sender: MessageSender,
        body: String,
        reply_to: Option<MessageId>,
        now: u64,
    ) -> Self {
        Self {
            id: generate_id(),
            room_id: room_id.to_string(),
            sender: Some(sender),
            body,
            timestamp: now,
            kind: MessageKind::Message,
            reply_to,
            moderated: false,
            moderation_reason: None,
        }
    }

    /// Build a system notice
    pub fn system(room_id: &str, body: String, now: u64) -> Self {
        Self {
            id: generate_id(),
            room_id: room_id.to_string(),
            sender: None,
            body,
            timestamp: now,
            kind: MessageKind::System,
            reply_to: None,
            moderated: false,
            moderation_reason: None,
        }
    }
}

/// Per-room admission policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    /// Minimum interval between accepted messages per non-moderator
    pub slow_mode: bool,
    pub slow_mode_interval_secs: u64,
    /// Only subscribers (and moderators) may send
    pub subscriber_only: bool,
    /// Room-specific filtered words, merged with the global banned list
    pub filtered_words: Vec<String>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            slow_mode: false,
            slow_mode_interval_secs: 0,
            subscriber_only: false,
            filtered_words: Vec::new(),
        }
    }
}

/// Moderation action selector on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationKind {
    Delete,
    Ban,
    Timeout,
    Unmute,
}

// =============================================================================
// Client -> Server commands
// =============================================================================

/// Inbound command union
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Establish the identity bound to this connection
    Register {
        #[serde(default)]
        user_id: Option<UserId>,
        username: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        roles: Vec<String>,
        #[serde(default)]
        color: Option<String>,
    },

    /// Join a room by id or by stream key (exactly one must be set)
    JoinRoom {
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        stream_key: Option<String>,
    },

    /// Send a chat message to a room
    SendMessage {
        room_id: RoomId,
        message: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },

    /// Apply a moderation action
    Moderate {
        room_id: RoomId,
        action: ModerationKind,
        #[serde(default)]
        target_id: Option<UserId>,
        #[serde(default)]
        message_id: Option<MessageId>,
        #[serde(default)]
        duration_secs: Option<u64>,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Leave a room
    LeaveRoom { room_id: RoomId },

    /// Keepalive
    Ping { timestamp: u64 },
}

// =============================================================================
// Server -> Client events
// =============================================================================

/// Outbound event union
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Identity accepted (targeted)
    Registered {
        user_id: UserId,
        username: String,
        display_name: String,
    },

    /// Join accepted; replay of recent history (targeted)
    RoomJoined {
        room_id: RoomId,
        user: PublicUser,
        recent_messages: Vec<ChatMessage>,
        user_count: usize,
    },

    /// Another member joined (broadcast, public fields only)
    UserJoined {
        room_id: RoomId,
        user: PublicUser,
        user_count: usize,
    },

    /// A member left (broadcast)
    UserLeft {
        room_id: RoomId,
        user_id: UserId,
        user_count: usize,
    },

    /// Accepted chat or system message (broadcast)
    NewMessage { message: ChatMessage },

    /// A history entry was redacted in place (broadcast)
    MessageModerated {
        room_id: RoomId,
        message_id: MessageId,
        reason: Option<String>,
    },

    /// A member was banned and removed (broadcast)
    UserBanned { room_id: RoomId, user_id: UserId },

    /// A member was timed out (broadcast)
    UserTimedOut {
        room_id: RoomId,
        user_id: UserId,
        duration_secs: u64,
        expires_at: u64,
    },

    /// Moderation notice to the affected user (targeted)
    Moderation {
        room_id: RoomId,
        action: ModerationKind,
        #[serde(default)]
        duration_secs: Option<u64>,
        #[serde(default)]
        expires_at: Option<u64>,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Rejected request (targeted)
    Error { code: u32, message: String },

    /// Keepalive response
    Pong { timestamp: u64 },
}

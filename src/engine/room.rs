//! Room state and membership management
//!
//! Each room owns its membership, settings, ban records and message history
//! behind a single lock, so concurrent joins, sends and moderation actions
//! against the same room are linearized while different rooms proceed in
//! parallel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::current_timestamp;
use crate::engine::moderation::{self, ModerationAction, ModerationOutcome};
use crate::engine::{admission, assign_color, EngineConfig};
use crate::error::{ChatError, Result};
use crate::protocol::messages::{
    ChatMessage, ChatUser, Identity, RoomId, RoomSettings, UserId, STREAM_ROOM_PREFIX,
};

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub user: ChatUser,
    /// Replay snapshot, oldest first, taken before the join notice
    pub recent_messages: Vec<ChatMessage>,
    pub user_count: usize,
    /// None when the user was already a member (join is then a refresh)
    pub system_message: Option<ChatMessage>,
}

/// Result of a leave that actually removed a member
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub user: ChatUser,
    pub user_count: usize,
    pub system_message: ChatMessage,
}

/// Mutable room state, guarded by the room's lock
pub(crate) struct RoomState {
    pub(crate) settings: RoomSettings,
    pub(crate) members: HashMap<UserId, ChatUser>,
    /// Identities banned from this room for its lifetime
    pub(crate) banned: HashSet<UserId>,
    pub(crate) history: VecDeque<ChatMessage>,
    /// Timestamp of the last accepted message (unix ms)
    pub(crate) last_activity: u64,
}

impl RoomState {
    pub(crate) fn new(settings: RoomSettings, now: u64) -> Self {
        Self {
            settings,
            members: HashMap::new(),
            banned: HashSet::new(),
            history: VecDeque::new(),
            last_activity: now,
        }
    }

    /// Append a message, evicting the oldest entry past the cap
    pub(crate) fn push_history(&mut self, message: ChatMessage, cap: usize) {
        self.history.push_back(message);
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    /// Last `limit` messages in chronological order
    pub(crate) fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.history.len().saturating_sub(limit);
        self.history.iter().skip(start).cloned().collect()
    }

    /// Append a system notice and return a copy for broadcast
    pub(crate) fn append_system(
        &mut self,
        room_id: &str,
        body: String,
        cap: usize,
        now: u64,
    ) -> ChatMessage {
        let message = ChatMessage::system(room_id, body, now);
        self.push_history(message.clone(), cap);
        message
    }
}

/// An isolated chat channel with its own membership, history and settings
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Stream key this room is bound to, if any
    pub stream_key: Option<String>,
    pub created_at: u64,
    config: Arc<EngineConfig>,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(
        id: RoomId,
        name: String,
        stream_key: Option<String>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id,
            name,
            stream_key,
            created_at: now,
            config,
            state: RwLock::new(RoomState::new(RoomSettings::default(), now)),
        }
    }

    /// Stream-bound rooms are exempt from idle eviction
    pub fn is_stream_bound(&self) -> bool {
        self.stream_key.is_some() || self.id.starts_with(STREAM_ROOM_PREFIX)
    }

    /// Register a user's presence in this room
    ///
    /// Rejects identities with a standing ban. A join by an existing member
    /// keeps the current membership record (including any active mute).
    pub async fn join(&self, identity: &Identity) -> Result<JoinOutcome> {
        self.join_at(identity, current_timestamp()).await
    }

    pub(crate) async fn join_at(&self, identity: &Identity, now: u64) -> Result<JoinOutcome> {
        let mut state = self.state.write().await;

        if state.banned.contains(&identity.user_id) {
            return Err(ChatError::banned("removed from this room by a moderator"));
        }

        if let Some(existing) = state.members.get(&identity.user_id) {
            let user = existing.clone();
            let recent_messages = state.recent(self.config.replay_limit);
            let user_count = state.members.len();
            return Ok(JoinOutcome {
                user,
                recent_messages,
                user_count,
                system_message: None,
            });
        }

        let color = identity
            .color
            .clone()
            .unwrap_or_else(|| assign_color(&identity.user_id));

        let user = ChatUser {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            display_name: identity.display_name.clone(),
            roles: identity.roles.clone(),
            joined_at: now,
            banned: false,
            muted: false,
            mute_expires_at: None,
            color,
        };

        // Snapshot replay before the join notice lands in history
        let recent_messages = state.recent(self.config.replay_limit);

        state.members.insert(user.user_id.clone(), user.clone());
        let user_count = state.members.len();

        let body = format!("{} joined the chat", user.display_name);
        let system_message =
            state.append_system(&self.id, body, self.config.history_cap, now);

        Ok(JoinOutcome {
            user,
            recent_messages,
            user_count,
            system_message: Some(system_message),
        })
    }

    /// Remove a user's presence; `None` when not a member (idempotent)
    pub async fn leave(&self, user_id: &str) -> Option<LeaveOutcome> {
        self.leave_at(user_id, current_timestamp()).await
    }

    pub(crate) async fn leave_at(&self, user_id: &str, now: u64) -> Option<LeaveOutcome> {
        let mut state = self.state.write().await;

        let user = state.members.remove(user_id)?;
        let user_count = state.members.len();

        let body = format!("{} left the chat", user.display_name);
        let system_message = state.append_system(&self.id, body, self.config.history_cap, now);

        Some(LeaveOutcome {
            user,
            user_count,
            system_message,
        })
    }

    /// Run a message through the admission pipeline
    pub async fn submit_message(
        &self,
        user_id: &str,
        body: &str,
        reply_to: Option<String>,
    ) -> Result<ChatMessage> {
        self.submit_message_at(user_id, body, reply_to, current_timestamp())
            .await
    }

    pub(crate) async fn submit_message_at(
        &self,
        user_id: &str,
        body: &str,
        reply_to: Option<String>,
        now: u64,
    ) -> Result<ChatMessage> {
        let mut state = self.state.write().await;
        admission::admit(
            &mut state,
            &self.config,
            &self.id,
            user_id,
            body,
            reply_to,
            now,
        )
    }

    /// Apply a moderation action on behalf of `moderator_id`
    pub async fn apply_moderation(
        &self,
        moderator_id: &str,
        action: ModerationAction,
    ) -> Result<ModerationOutcome> {
        self.apply_moderation_at(moderator_id, action, current_timestamp())
            .await
    }

    pub(crate) async fn apply_moderation_at(
        &self,
        moderator_id: &str,
        action: ModerationAction,
        now: u64,
    ) -> Result<ModerationOutcome> {
        let mut state = self.state.write().await;
        moderation::apply(&mut state, &self.config, &self.id, moderator_id, action, now)
    }

    /// Append a system notice (welcome message, announcements)
    pub async fn post_system(&self, body: &str) -> ChatMessage {
        let now = current_timestamp();
        let mut state = self.state.write().await;
        state.append_system(&self.id, body.to_string(), self.config.history_cap, now)
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn member_ids(&self) -> Vec<UserId> {
        self.state.read().await.members.keys().cloned().collect()
    }

    pub async fn is_member(&self, user_id: &str) -> bool {
        self.state.read().await.members.contains_key(user_id)
    }

    pub async fn get_member(&self, user_id: &str) -> Option<ChatUser> {
        self.state.read().await.members.get(user_id).cloned()
    }

    pub async fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        self.state.read().await.recent(limit)
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub async fn settings(&self) -> RoomSettings {
        self.state.read().await.settings.clone()
    }

    pub async fn set_settings(&self, settings: RoomSettings) {
        self.state.write().await.settings = settings;
    }

    pub async fn last_activity(&self) -> u64 {
        self.state.read().await.last_activity
    }
}

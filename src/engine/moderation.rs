//! Moderation engine
//!
//! Applies delete/ban/timeout/unmute against room state. Every action
//! requires the caller to be a current member holding a moderator role.
//! Mutations happen under the room lock, so an action is atomic with
//! respect to concurrent joins and sends.

use crate::engine::room::RoomState;
use crate::engine::EngineConfig;
use crate::error::{ChatError, Result};
use crate::protocol::messages::{ChatMessage, ChatUser, MessageId, UserId};

/// Placeholder written over deleted message bodies
pub const REDACTED_BODY: &str = "[message removed by moderator]";

/// A resolved moderation request
#[derive(Debug, Clone)]
pub enum ModerationAction {
    /// Redact a message in place; the history entry is retained
    Delete {
        message_id: MessageId,
        reason: Option<String>,
    },
    /// Remove the member and bar the identity from re-joining
    Ban {
        target_id: UserId,
        reason: Option<String>,
    },
    /// Mute the member until now + duration; re-applying overwrites expiry
    Timeout {
        target_id: UserId,
        duration_secs: Option<u64>,
        reason: Option<String>,
    },
    /// Clear a mute; succeeds even when the member was not muted
    Unmute { target_id: UserId },
}

/// What a successfully applied action did, for fan-out by the caller
#[derive(Debug, Clone)]
pub enum ModerationOutcome {
    Deleted {
        /// Redacted copy of the history entry
        message: ChatMessage,
    },
    Banned {
        target: ChatUser,
        user_count: usize,
        system_message: ChatMessage,
        reason: Option<String>,
    },
    TimedOut {
        target: ChatUser,
        duration_secs: u64,
        expires_at: u64,
        system_message: ChatMessage,
        reason: Option<String>,
    },
    Unmuted {
        target: ChatUser,
        system_message: ChatMessage,
    },
}

pub(crate) fn apply(
    state: &mut RoomState,
    config: &EngineConfig,
    room_id: &str,
    moderator_id: &str,
    action: ModerationAction,
    now: u64,
) -> Result<ModerationOutcome> {
    let allowed = state
        .members
        .get(moderator_id)
        .map(|m| m.is_moderator())
        .unwrap_or(false);
    if !allowed {
        return Err(ChatError::permission_denied(
            "moderator privileges required",
        ));
    }

    match action {
        ModerationAction::Delete { message_id, reason } => {
            let entry = state
                .history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| ChatError::message_not_found(message_id.clone()))?;

            entry.body = REDACTED_BODY.to_string();
            entry.moderated = true;
            entry.moderation_reason = reason;

            Ok(ModerationOutcome::Deleted {
                message: entry.clone(),
            })
        }

        ModerationAction::Ban { target_id, reason } => {
            let mut target = state
                .members
                .remove(&target_id)
                .ok_or_else(|| ChatError::user_not_found(target_id.clone()))?;
            target.banned = true;
            state.banned.insert(target_id);

            let user_count = state.members.len();
            let body = format!("{} was banned from the chat", target.display_name);
            let system_message = state.append_system(room_id, body, config.history_cap, now);

            Ok(ModerationOutcome::Banned {
                target,
                user_count,
                system_message,
                reason,
            })
        }

        ModerationAction::Timeout {
            target_id,
            duration_secs,
            reason,
        } => {
            let duration_secs = duration_secs.unwrap_or(config.default_timeout_secs);
            let expires_at = now + duration_secs * 1000;

            let target = {
                let member = state
                    .members
                    .get_mut(&target_id)
                    .ok_or_else(|| ChatError::user_not_found(target_id.clone()))?;
                member.muted = true;
                // Last write wins, no stacking
                member.mute_expires_at = Some(expires_at);
                member.clone()
            };

            let body = format!("{} was timed out", target.display_name);
            let system_message = state.append_system(room_id, body, config.history_cap, now);

            Ok(ModerationOutcome::TimedOut {
                target,
                duration_secs,
                expires_at,
                system_message,
                reason,
            })
        }

        ModerationAction::Unmute { target_id } => {
            let target = {
                let member = state
                    .members
                    .get_mut(&target_id)
                    .ok_or_else(|| ChatError::user_not_found(target_id.clone()))?;
                member.muted = false;
                member.mute_expires_at = None;
                member.clone()
            };

            let body = format!("{} was unmuted", target.display_name);
            let system_message = state.append_system(room_id, body, config.history_cap, now);

            Ok(ModerationOutcome::Unmuted {
                target,
                system_message,
            })
        }
    }
}

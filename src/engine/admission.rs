//! Message admission pipeline
//!
//! Validates and transforms an incoming message before acceptance. Checks
//! run in a fixed order and short-circuit on the first failure: body
//! validity, membership, ban, mute (expired mutes are cleared in place),
//! slow mode, subscriber-only, content filter. The filter masks matches
//! instead of rejecting. Runs entirely inside the room lock so admission,
//! history append and the activity bump are one atomic step.

use std::collections::VecDeque;

use crate::engine::room::RoomState;
use crate::engine::EngineConfig;
use crate::error::{ChatError, Result};
use crate::protocol::messages::{ChatMessage, MessageId, MessageKind};

/// Replacement for filtered words
pub const FILTER_MASK: &str = "***";

/// Moderation reason recorded on masked messages
pub const FILTER_REASON: &str = "contained filtered words";

pub(crate) fn admit(
    state: &mut RoomState,
    config: &EngineConfig,
    room_id: &str,
    user_id: &str,
    body: &str,
    reply_to: Option<MessageId>,
    now: u64,
) -> Result<ChatMessage> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ChatError::invalid_message("message body is empty"));
    }
    if trimmed.chars().count() > config.max_message_len {
        return Err(ChatError::invalid_message(format!(
            "message exceeds {} characters",
            config.max_message_len
        )));
    }

    let (sender, is_moderator, is_subscriber) = {
        let member = state
            .members
            .get_mut(user_id)
            .ok_or_else(|| ChatError::user_not_found("not in this room"))?;

        if member.banned {
            return Err(ChatError::banned("you are banned from this room"));
        }

        if member.muted {
            let expired = member.mute_expires_at.map(|t| t <= now).unwrap_or(false);
            if expired {
                member.muted = false;
                member.mute_expires_at = None;
            } else {
                return Err(ChatError::muted("your timeout has not expired yet"));
            }
        }

        (
            member.sender_snapshot(),
            member.is_moderator(),
            member.is_subscriber(),
        )
    };

    let settings = &state.settings;

    if settings.slow_mode && settings.slow_mode_interval_secs > 0 && !is_moderator {
        if let Some(last) = last_message_timestamp(&state.history, user_id) {
            let interval_ms = settings.slow_mode_interval_secs * 1000;
            let elapsed = now.saturating_sub(last);
            if elapsed < interval_ms {
                // Ceiling so a fractional remainder never reports 0s
                let retry_after_secs = (interval_ms - elapsed + 999) / 1000;
                return Err(ChatError::rate_limited(retry_after_secs));
            }
        }
    }

    if settings.subscriber_only && !is_subscriber && !is_moderator {
        return Err(ChatError::subscriber_only(
            "only subscribers may chat in this room",
        ));
    }

    let mut message = ChatMessage::user(room_id, sender, trimmed.to_string(), reply_to, now);

    let words = config
        .banned_words
        .iter()
        .chain(settings.filtered_words.iter());
    if let Some(masked) = mask_filtered_words(&message.body, words) {
        message.body = masked;
        message.moderated = true;
        message.moderation_reason = Some(FILTER_REASON.to_string());
    }

    state.push_history(message.clone(), config.history_cap);
    state.last_activity = now;

    Ok(message)
}

/// Timestamp of the sender's most recent message-kind history entry
fn last_message_timestamp(history: &VecDeque<ChatMessage>, user_id: &str) -> Option<u64> {
    history
        .iter()
        .rev()
        .find(|m| {
            m.kind == MessageKind::Message
                && m.sender.as_ref().map(|s| s.user_id.as_str()) == Some(user_id)
        })
        .map(|m| m.timestamp)
}

/// Mask every case-insensitive whole-word match of any filter entry
///
/// Returns `None` when nothing matched; word boundaries are alphanumeric
/// runs, so partial matches inside longer words are left alone.
pub(crate) fn mask_filtered_words<'a, I>(body: &str, words: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let lowered: Vec<String> = words.into_iter().map(|w| w.to_lowercase()).collect();
    if lowered.is_empty() {
        return None;
    }

    fn flush(word: &mut String, out: &mut String, lowered: &[String], changed: &mut bool) {
        if word.is_empty() {
            return;
        }
        if lowered.iter().any(|w| *w == word.to_lowercase()) {
            out.push_str(FILTER_MASK);
            *changed = true;
        } else {
            out.push_str(word);
        }
        word.clear();
    }

    let mut out = String::with_capacity(body.len());
    let mut word = String::new();
    let mut changed = false;

    for ch in body.chars() {
        if ch.is_alphanumeric() {
            word.push(ch);
        } else {
            flush(&mut word, &mut out, &lowered, &mut changed);
            out.push(ch);
        }
    }
    flush(&mut word, &mut out, &lowered, &mut changed);

    if changed {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ChatUser, RoomSettings};

    fn member(user_id: &str, roles: &[&str]) -> ChatUser {
        ChatUser {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            display_name: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            joined_at: 0,
            banned: false,
            muted: false,
            mute_expires_at: None,
            color: "#2196f3".to_string(),
        }
    }

    fn state_with(members: Vec<ChatUser>, settings: RoomSettings) -> RoomState {
        let mut state = RoomState::new(settings, 0);
        for m in members {
            state.members.insert(m.user_id.clone(), m);
        }
        state
    }

    fn submit(state: &mut RoomState, config: &EngineConfig, user: &str, body: &str, now: u64) -> Result<ChatMessage> {
        admit(state, config, "room-1", user, body, None, now)
    }

    #[test]
    fn test_non_member_rejected() {
        let config = EngineConfig::default();
        let mut state = state_with(vec![], RoomSettings::default());
        let err = submit(&mut state, &config, "ghost", "hi", 0).unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound(_)));
    }

    #[test]
    fn test_empty_body_rejected() {
        let config = EngineConfig::default();
        let mut state = state_with(vec![member("u1", &[])], RoomSettings::default());
        let err = submit(&mut state, &config, "u1", "   ", 0).unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)));
    }

    #[test]
    fn test_active_mute_rejects_and_expired_mute_clears() {
        let config = EngineConfig::default();
        let mut muted = member("u1", &[]);
        muted.muted = true;
        muted.mute_expires_at = Some(10_000);
        let mut state = state_with(vec![muted], RoomSettings::default());

        let err = submit(&mut state, &config, "u1", "hi", 5_000).unwrap_err();
        assert!(matches!(err, ChatError::Muted(_)));

        // Expiry is observed lazily at the next send attempt
        let msg = submit(&mut state, &config, "u1", "hi again", 10_000).unwrap();
        assert_eq!(msg.body, "hi again");
        let m = state.members.get("u1").unwrap();
        assert!(!m.muted);
        assert!(m.mute_expires_at.is_none());
    }

    #[test]
    fn test_slow_mode_retry_after_is_ceiled() {
        let config = EngineConfig::default();
        let settings = RoomSettings {
            slow_mode: true,
            slow_mode_interval_secs: 3,
            ..Default::default()
        };
        let mut state = state_with(vec![member("u1", &[])], settings);

        submit(&mut state, &config, "u1", "first", 0).unwrap();

        let err = submit(&mut state, &config, "u1", "second", 1_000).unwrap_err();
        match err {
            ChatError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 2),
            other => panic!("Expected rate limit, got {:?}", other),
        }

        // Fractional remainder still blocks and never reports 0
        let err = submit(&mut state, &config, "u1", "second", 2_900).unwrap_err();
        match err {
            ChatError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 1),
            other => panic!("Expected rate limit, got {:?}", other),
        }

        let msg = submit(&mut state, &config, "u1", "second", 3_100).unwrap();
        assert_eq!(msg.body, "second");
    }

    #[test]
    fn test_slow_mode_exempts_moderators() {
        let config = EngineConfig::default();
        let settings = RoomSettings {
            slow_mode: true,
            slow_mode_interval_secs: 10,
            ..Default::default()
        };
        let mut state = state_with(vec![member("mod", &["moderator"])], settings);

        submit(&mut state, &config, "mod", "one", 0).unwrap();
        submit(&mut state, &config, "mod", "two", 100).unwrap();
    }

    #[test]
    fn test_slow_mode_scenario_three_accepted_two_rejected() {
        let config = EngineConfig::default();
        let settings = RoomSettings {
            slow_mode: true,
            slow_mode_interval_secs: 2,
            ..Default::default()
        };
        let mut state = state_with(vec![member("u1", &[])], settings);

        let mut accepted = 0;
        let mut rejected = 0;
        for second in 0..5u64 {
            match submit(&mut state, &config, "u1", "spam", second * 1_000) {
                Ok(_) => accepted += 1,
                Err(ChatError::RateLimited { .. }) => rejected += 1,
                Err(other) => panic!("Unexpected rejection: {:?}", other),
            }
        }
        assert_eq!(accepted, 3); // t=0, t=2, t=4
        assert_eq!(rejected, 2);
    }

    #[test]
    fn test_subscriber_only_gate() {
        let config = EngineConfig::default();
        let settings = RoomSettings {
            subscriber_only: true,
            ..Default::default()
        };
        let mut state = state_with(
            vec![
                member("viewer", &["viewer"]),
                member("sub", &["subscriber"]),
                member("mod", &["moderator"]),
            ],
            settings,
        );

        let err = submit(&mut state, &config, "viewer", "hi", 0).unwrap_err();
        assert!(matches!(err, ChatError::SubscriberOnly(_)));

        submit(&mut state, &config, "sub", "hi", 0).unwrap();
        submit(&mut state, &config, "mod", "hi", 0).unwrap();
    }

    #[test]
    fn test_content_filter_masks_and_flags() {
        let config = EngineConfig {
            banned_words: vec!["inappropriate1".to_string()],
            ..Default::default()
        };
        let mut state = state_with(vec![member("u1", &[])], RoomSettings::default());

        let msg = submit(
            &mut state,
            &config,
            "u1",
            "this is inappropriate1 content",
            0,
        )
        .unwrap();
        assert_eq!(msg.body, "this is *** content");
        assert!(msg.moderated);
        assert_eq!(msg.moderation_reason.as_deref(), Some(FILTER_REASON));

        // History holds the redacted body, not the original
        assert_eq!(state.history.back().unwrap().body, "this is *** content");
    }

    #[test]
    fn test_room_filter_list_merged_with_global() {
        let config = EngineConfig {
            banned_words: vec!["global".to_string()],
            ..Default::default()
        };
        let settings = RoomSettings {
            filtered_words: vec!["local".to_string()],
            ..Default::default()
        };
        let mut state = state_with(vec![member("u1", &[])], settings);

        let msg = submit(&mut state, &config, "u1", "global and LOCAL words", 0).unwrap();
        assert_eq!(msg.body, "*** and *** words");
    }

    #[test]
    fn test_filter_matches_whole_words_only() {
        let words = vec!["spam".to_string()];
        assert_eq!(
            mask_filtered_words("spam spammy SPAM.", words.iter()),
            Some("*** spammy ***.".to_string())
        );
        assert!(mask_filtered_words("spammy antispam", words.iter()).is_none());
    }

    #[test]
    fn test_clean_message_not_flagged() {
        let config = EngineConfig {
            banned_words: vec!["bad".to_string()],
            ..Default::default()
        };
        let mut state = state_with(vec![member("u1", &[])], RoomSettings::default());

        let msg = submit(&mut state, &config, "u1", "perfectly fine", 0).unwrap();
        assert!(!msg.moderated);
        assert!(msg.moderation_reason.is_none());
    }

    #[test]
    fn test_accepted_message_updates_activity_and_history() {
        let config = EngineConfig::default();
        let mut state = state_with(vec![member("u1", &[])], RoomSettings::default());

        assert_eq!(state.history.len(), 0);
        submit(&mut state, &config, "u1", "hello", 42_000).unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.last_activity, 42_000);
    }

    #[test]
    fn test_sender_snapshot_taken_at_send_time() {
        let config = EngineConfig::default();
        let mut state = state_with(vec![member("u1", &[])], RoomSettings::default());
        let msg = submit(&mut state, &config, "u1", "hello", 0).unwrap();

        let sender = msg.sender.as_ref().unwrap();
        assert_eq!(sender.user_id, "u1");
        assert_eq!(sender.username, "u1");
        assert_eq!(sender.color, "#2196f3");
        assert_eq!(msg.kind, MessageKind::Message);
    }
}

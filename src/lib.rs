//! Live chat room engine for a self-hosted streaming platform
//!
//! This library provides the chat core that runs next to the media ingest:
//! ephemeral rooms bound to stream keys, per-room membership and moderation
//! state, a message admission pipeline (slow mode, subscriber-only,
//! mute/ban/timeout, word filter), and typed event fan-out to every member
//! of a room. Transport is QUIC with length-prefixed JSON frames.

pub mod client;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ChatClient, ChatClientConfig};
pub use engine::registry::RoomRegistry;
pub use error::{ChatError, Result};
pub use server::chat_server::{ChatServer, ServerConfig};

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique identifier (users, messages, connections)
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_unique() {
        let a = generate_id();
        let b = generate_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_nonzero() {
        let t1 = current_timestamp();
        let t2 = current_timestamp();
        assert!(t1 > 0);
        assert!(t2 >= t1);
    }
}

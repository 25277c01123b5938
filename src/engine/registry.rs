//! Room registry: name/stream-key resolution, creation, idle eviction
//!
//! The registry's map is the only cross-room shared structure; everything
//! else is owned per room. Check-then-create races resolve through the
//! store's insert-if-absent, so at most one room exists per key.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::engine::room::Room;
use crate::engine::EngineConfig;
use crate::protocol::messages::{stream_room_id, RoomId};

/// Body of the system message seeded into newly created rooms
pub const WELCOME_MESSAGE: &str = "Welcome to the chat!";

/// Backing store for the room map
///
/// In-memory for v1; a persistent implementation can be swapped in without
/// touching the registry contract.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get(&self, room_id: &str) -> Option<Arc<Room>>;

    /// Register `room` unless one already exists under its id; returns the
    /// room that is registered after the call
    async fn insert_if_absent(&self, room: Arc<Room>) -> Arc<Room>;

    async fn remove(&self, room_id: &str) -> Option<Arc<Room>>;

    async fn room_ids(&self) -> Vec<RoomId>;

    async fn count(&self) -> usize;
}

/// Map-based in-memory store
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    async fn insert_if_absent(&self, room: Arc<Room>) -> Arc<Room> {
        let mut rooms = self.rooms.write().await;
        match rooms.entry(room.id.clone()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&room));
                room
            }
        }
    }

    async fn remove(&self, room_id: &str) -> Option<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_id)
    }

    async fn room_ids(&self) -> Vec<RoomId> {
        let rooms = self.rooms.read().await;
        rooms.keys().cloned().collect()
    }

    async fn count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

/// Registry over a room store
pub struct RoomRegistry {
    store: Arc<dyn RoomStore>,
    config: Arc<EngineConfig>,
}

impl RoomRegistry {
    /// Create a registry backed by the in-memory store
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryRoomStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn RoomStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.store.get(room_id).await
    }

    /// Resolve an ad-hoc room by id, creating it on first reference
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        self.resolve(room_id.to_string(), room_id.to_string(), None)
            .await
    }

    /// Resolve the room bound to a stream key, creating it on first join
    ///
    /// The room id is derived deterministically from the key, so concurrent
    /// joins for the same key converge on one room.
    pub async fn get_or_create_by_stream_key(&self, stream_key: &str) -> Arc<Room> {
        self.resolve(
            stream_room_id(stream_key),
            stream_key.to_string(),
            Some(stream_key.to_string()),
        )
        .await
    }

    async fn resolve(&self, id: RoomId, name: String, stream_key: Option<String>) -> Arc<Room> {
        if let Some(existing) = self.store.get(&id).await {
            return existing;
        }

        let candidate = Arc::new(Room::new(id, name, stream_key, Arc::clone(&self.config)));
        let room = self.store.insert_if_absent(Arc::clone(&candidate)).await;

        // Only the winner of the insert race seeds the welcome message
        if Arc::ptr_eq(&room, &candidate) {
            room.post_system(WELCOME_MESSAGE).await;
            info!("Created room {}", room.id);
        }

        room
    }

    /// Arm the idle-eviction timer for a room that just became empty
    ///
    /// Membership is re-checked when the timer fires, so a join during the
    /// grace window cancels the eviction. Stream-bound rooms are exempt.
    pub fn schedule_eviction_if_empty(self: &Arc<Self>, room_id: &str) {
        let registry = Arc::clone(self);
        let room_id = room_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(registry.config.eviction_grace).await;

            let room = match registry.store.get(&room_id).await {
                Some(room) => room,
                None => return,
            };
            if room.is_stream_bound() {
                return;
            }
            if room.member_count().await > 0 {
                debug!("Eviction of {} cancelled, room repopulated", room_id);
                return;
            }

            registry.store.remove(&room_id).await;
            info!("Evicted idle room {}", room_id);
        });
    }

    pub async fn room_count(&self) -> usize {
        self.store.count().await
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.store.room_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::Identity;
    use std::collections::HashSet;
    use std::time::Duration;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            display_name: user_id.to_string(),
            roles: HashSet::new(),
            color: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = RoomRegistry::new(EngineConfig::default());

        let a = registry.get_or_create("lobby").await;
        let b = registry.get_or_create("lobby").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_stream_key_derives_room_id() {
        let registry = RoomRegistry::new(EngineConfig::default());

        let room = registry.get_or_create_by_stream_key("abc").await;
        assert_eq!(room.id, "stream_abc");
        assert_eq!(room.name, "abc");
        assert!(room.is_stream_bound());

        let again = registry.get_or_create_by_stream_key("abc").await;
        assert!(Arc::ptr_eq(&room, &again));
    }

    #[tokio::test]
    async fn test_new_room_seeded_with_welcome() {
        let registry = RoomRegistry::new(EngineConfig::default());
        let room = registry.get_or_create_by_stream_key("abc").await;

        let recent = room.recent_messages(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].body, WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_room() {
        let registry = Arc::new(RoomRegistry::new(EngineConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_create_by_stream_key("popular").await
            }));
        }

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }

        assert_eq!(registry.room_count().await, 1);
        for room in &rooms[1..] {
            assert!(Arc::ptr_eq(&rooms[0], room));
        }
        // A single welcome message despite the race
        assert_eq!(rooms[0].history_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_evicted_after_grace() {
        let config = EngineConfig {
            eviction_grace: Duration::from_secs(600),
            ..Default::default()
        };
        let registry = Arc::new(RoomRegistry::new(config));

        let room = registry.get_or_create("adhoc").await;
        room.join(&identity("u1")).await.unwrap();
        room.leave("u1").await;

        registry.schedule_eviction_if_empty("adhoc");
        tokio::time::sleep(Duration::from_secs(601)).await;

        assert!(registry.get("adhoc").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_during_grace_cancels_eviction() {
        let config = EngineConfig {
            eviction_grace: Duration::from_secs(600),
            ..Default::default()
        };
        let registry = Arc::new(RoomRegistry::new(config));

        let room = registry.get_or_create("adhoc").await;
        room.join(&identity("u1")).await.unwrap();
        room.leave("u1").await;

        registry.schedule_eviction_if_empty("adhoc");
        tokio::time::sleep(Duration::from_secs(300)).await;

        // Someone comes back before the window elapses
        room.join(&identity("u2")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(400)).await;

        assert!(registry.get("adhoc").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_room_exempt_from_eviction() {
        let config = EngineConfig {
            eviction_grace: Duration::from_secs(600),
            ..Default::default()
        };
        let registry = Arc::new(RoomRegistry::new(config));

        let room = registry.get_or_create_by_stream_key("abc").await;
        room.join(&identity("u1")).await.unwrap();
        room.leave("u1").await;

        registry.schedule_eviction_if_empty(&room.id);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(registry.get("stream_abc").await.is_some());
    }
}

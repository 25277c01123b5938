//! Chat server orchestration
//!
//! Owns the room registry, the connection gateway and per-connection
//! sessions, and dispatches inbound commands to the engine. Every rejection
//! is recovered here and answered with a targeted `error` event; nothing a
//! single connection does can disturb another room's state.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::engine::moderation::{ModerationAction, ModerationOutcome};
use crate::engine::registry::RoomRegistry;
use crate::engine::room::Room;
use crate::engine::EngineConfig;
use crate::error::{ChatError, Result};
use crate::generate_id;
use crate::protocol::codec::MAX_FRAME_SIZE;
use crate::protocol::messages::{
    ClientCommand, Identity, MessageId, ModerationKind, RoomId, ServerEvent, UserId,
};
use crate::transport::gateway::{ConnectionGateway, Fanout};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Maximum inbound frame size
    pub max_frame_size: usize,
    /// Engine tuning
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 10000,
            idle_timeout: Duration::from_secs(300),
            max_frame_size: MAX_FRAME_SIZE,
            engine: EngineConfig::default(),
        }
    }
}

/// Per-connection state
#[derive(Default)]
struct Session {
    /// Identity bound at register time
    identity: Option<Identity>,
    /// Rooms this connection has joined
    rooms: HashSet<RoomId>,
}

/// The chat server core
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    gateway: Arc<ConnectionGateway>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.engine.clone()));
        Self {
            config,
            registry,
            gateway: Arc::new(ConnectionGateway::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        &self.gateway
    }

    /// Attach a new connection and its outbound event channel
    pub async fn connect(&self, conn_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.gateway.register(conn_id, tx).await;
        let mut sessions = self.sessions.write().await;
        sessions.insert(conn_id.to_string(), Session::default());
        debug!("Connection {} attached", conn_id);
    }

    /// Dispatch one inbound command; rejections become targeted error events
    pub async fn handle_command(&self, conn_id: &str, cmd: ClientCommand) {
        let result = match cmd {
            ClientCommand::Register {
                user_id,
                username,
                display_name,
                roles,
                color,
            } => {
                self.handle_register(conn_id, user_id, username, display_name, roles, color)
                    .await
            }
            ClientCommand::JoinRoom {
                room_id,
                stream_key,
            } => self.handle_join(conn_id, room_id, stream_key).await,
            ClientCommand::SendMessage {
                room_id,
                message,
                reply_to,
            } => self.handle_send(conn_id, &room_id, &message, reply_to).await,
            ClientCommand::Moderate {
                room_id,
                action,
                target_id,
                message_id,
                duration_secs,
                reason,
            } => {
                self.handle_moderate(
                    conn_id,
                    &room_id,
                    action,
                    target_id,
                    message_id,
                    duration_secs,
                    reason,
                )
                .await
            }
            ClientCommand::LeaveRoom { room_id } => self.handle_leave(conn_id, &room_id).await,
            ClientCommand::Ping { timestamp } => {
                self.gateway
                    .send_to_connection(conn_id, ServerEvent::Pong { timestamp })
                    .await;
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Rejected request on {}: {}", conn_id, e);
            self.gateway
                .send_to_connection(
                    conn_id,
                    ServerEvent::Error {
                        code: e.code(),
                        message: e.to_string(),
                    },
                )
                .await;
        }
    }

    /// Handle connection teardown: leave every joined room exactly once
    pub async fn disconnect(&self, conn_id: &str) {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(conn_id)
        };

        if let Some(session) = session {
            if let Some(identity) = session.identity {
                for room_id in session.rooms {
                    if let Some(room) = self.registry.get(&room_id).await {
                        self.leave_room_common(&room, &identity.user_id).await;
                    }
                }
            }
        }

        self.gateway.remove(conn_id).await;
        debug!("Connection {} detached", conn_id);
    }

    async fn handle_register(
        &self,
        conn_id: &str,
        user_id: Option<UserId>,
        username: String,
        display_name: Option<String>,
        roles: Vec<String>,
        color: Option<String>,
    ) -> Result<()> {
        if username.trim().is_empty() {
            return Err(ChatError::invalid_message("username is required"));
        }

        let identity = Identity {
            user_id: user_id.unwrap_or_else(generate_id),
            display_name: display_name.unwrap_or_else(|| username.clone()),
            username,
            roles: roles.into_iter().collect(),
            color,
        };

        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(conn_id)
                .ok_or_else(|| ChatError::internal("unknown connection"))?;
            session.identity = Some(identity.clone());
        }
        self.gateway.bind_user(conn_id, &identity.user_id).await;

        info!(
            "User {} ({}) registered on {}",
            identity.username, identity.user_id, conn_id
        );
        self.gateway
            .send_to_connection(
                conn_id,
                ServerEvent::Registered {
                    user_id: identity.user_id,
                    username: identity.username,
                    display_name: identity.display_name,
                },
            )
            .await;
        Ok(())
    }

    async fn handle_join(
        &self,
        conn_id: &str,
        room_id: Option<RoomId>,
        stream_key: Option<String>,
    ) -> Result<()> {
        let identity = self.identity(conn_id).await?;

        let room = match (room_id, stream_key) {
            (Some(id), None) => self.registry.get_or_create(&id).await,
            (None, Some(key)) => self.registry.get_or_create_by_stream_key(&key).await,
            _ => {
                return Err(ChatError::invalid_message(
                    "exactly one of room_id or stream_key is required",
                ))
            }
        };

        let outcome = room.join(&identity).await?;

        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(conn_id) {
                session.rooms.insert(room.id.clone());
            }
        }

        self.gateway
            .send_to_connection(
                conn_id,
                ServerEvent::RoomJoined {
                    room_id: room.id.clone(),
                    user: outcome.user.public(),
                    recent_messages: outcome.recent_messages,
                    user_count: outcome.user_count,
                },
            )
            .await;

        if let Some(system_message) = outcome.system_message {
            self.broadcast_room(
                &room,
                ServerEvent::UserJoined {
                    room_id: room.id.clone(),
                    user: outcome.user.public(),
                    user_count: outcome.user_count,
                },
                Some(&outcome.user.user_id),
            )
            .await;
            self.broadcast_room(
                &room,
                ServerEvent::NewMessage {
                    message: system_message,
                },
                None,
            )
            .await;
            info!("User {} joined room {}", outcome.user.username, room.id);
        }
        Ok(())
    }

    async fn handle_send(
        &self,
        conn_id: &str,
        room_id: &str,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> Result<()> {
        let identity = self.identity(conn_id).await?;
        let room = self
            .registry
            .get(room_id)
            .await
            .ok_or_else(|| ChatError::room_not_found(room_id))?;

        let message = room
            .submit_message(&identity.user_id, body, reply_to)
            .await?;
        debug!(
            "Message {} from {} in room {}",
            message.id, identity.username, room_id
        );

        self.broadcast_room(&room, ServerEvent::NewMessage { message }, None)
            .await;
        Ok(())
    }

    async fn handle_moderate(
        &self,
        conn_id: &str,
        room_id: &str,
        kind: ModerationKind,
        target_id: Option<UserId>,
        message_id: Option<MessageId>,
        duration_secs: Option<u64>,
        reason: Option<String>,
    ) -> Result<()> {
        let identity = self.identity(conn_id).await?;
        let room = self
            .registry
            .get(room_id)
            .await
            .ok_or_else(|| ChatError::room_not_found(room_id))?;

        let require_target = || {
            target_id
                .clone()
                .ok_or_else(|| ChatError::invalid_message("target_id is required"))
        };

        let action = match kind {
            ModerationKind::Delete => ModerationAction::Delete {
                message_id: message_id
                    .ok_or_else(|| ChatError::invalid_message("message_id is required"))?,
                reason,
            },
            ModerationKind::Ban => ModerationAction::Ban {
                target_id: require_target()?,
                reason,
            },
            ModerationKind::Timeout => ModerationAction::Timeout {
                target_id: require_target()?,
                duration_secs,
                reason,
            },
            ModerationKind::Unmute => ModerationAction::Unmute {
                target_id: require_target()?,
            },
        };

        let outcome = room.apply_moderation(&identity.user_id, action).await?;

        match outcome {
            ModerationOutcome::Deleted { message } => {
                info!(
                    "Message {} in room {} removed by {}",
                    message.id, room.id, identity.username
                );
                self.broadcast_room(
                    &room,
                    ServerEvent::MessageModerated {
                        room_id: room.id.clone(),
                        message_id: message.id.clone(),
                        reason: message.moderation_reason.clone(),
                    },
                    None,
                )
                .await;
            }

            ModerationOutcome::Banned {
                target,
                user_count,
                system_message,
                reason,
            } => {
                self.gateway
                    .send_to_user(
                        &target.user_id,
                        ServerEvent::Moderation {
                            room_id: room.id.clone(),
                            action: ModerationKind::Ban,
                            duration_secs: None,
                            expires_at: None,
                            reason,
                        },
                    )
                    .await;
                self.detach_user(&target.user_id, &room.id).await;
                self.broadcast_room(
                    &room,
                    ServerEvent::UserBanned {
                        room_id: room.id.clone(),
                        user_id: target.user_id.clone(),
                    },
                    None,
                )
                .await;
                self.broadcast_room(
                    &room,
                    ServerEvent::NewMessage {
                        message: system_message,
                    },
                    None,
                )
                .await;
                info!(
                    "User {} banned from room {} by {}",
                    target.username, room.id, identity.username
                );
                if user_count == 0 {
                    self.registry.schedule_eviction_if_empty(&room.id);
                }
            }

            ModerationOutcome::TimedOut {
                target,
                duration_secs,
                expires_at,
                system_message,
                reason,
            } => {
                self.gateway
                    .send_to_user(
                        &target.user_id,
                        ServerEvent::Moderation {
                            room_id: room.id.clone(),
                            action: ModerationKind::Timeout,
                            duration_secs: Some(duration_secs),
                            expires_at: Some(expires_at),
                            reason,
                        },
                    )
                    .await;
                self.broadcast_room(
                    &room,
                    ServerEvent::UserTimedOut {
                        room_id: room.id.clone(),
                        user_id: target.user_id.clone(),
                        duration_secs,
                        expires_at,
                    },
                    None,
                )
                .await;
                self.broadcast_room(
                    &room,
                    ServerEvent::NewMessage {
                        message: system_message,
                    },
                    None,
                )
                .await;
                info!(
                    "User {} timed out in room {} for {}s",
                    target.username, room.id, duration_secs
                );
            }

            ModerationOutcome::Unmuted {
                target,
                system_message,
            } => {
                self.gateway
                    .send_to_user(
                        &target.user_id,
                        ServerEvent::Moderation {
                            room_id: room.id.clone(),
                            action: ModerationKind::Unmute,
                            duration_secs: None,
                            expires_at: None,
                            reason: None,
                        },
                    )
                    .await;
                self.broadcast_room(
                    &room,
                    ServerEvent::NewMessage {
                        message: system_message,
                    },
                    None,
                )
                .await;
                info!("User {} unmuted in room {}", target.username, room.id);
            }
        }
        Ok(())
    }

    async fn handle_leave(&self, conn_id: &str, room_id: &str) -> Result<()> {
        let identity = self.identity(conn_id).await?;

        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(conn_id) {
                session.rooms.remove(room_id);
            }
        }

        let room = match self.registry.get(room_id).await {
            Some(room) => room,
            None => return Ok(()),
        };
        self.leave_room_common(&room, &identity.user_id).await;
        Ok(())
    }

    /// Shared leave path; a no-op when the user is not a member
    async fn leave_room_common(&self, room: &Arc<Room>, user_id: &str) {
        if let Some(outcome) = room.leave(user_id).await {
            self.broadcast_room(
                room,
                ServerEvent::UserLeft {
                    room_id: room.id.clone(),
                    user_id: user_id.to_string(),
                    user_count: outcome.user_count,
                },
                None,
            )
            .await;
            self.broadcast_room(
                room,
                ServerEvent::NewMessage {
                    message: outcome.system_message,
                },
                None,
            )
            .await;
            info!("User {} left room {}", outcome.user.username, room.id);
            if outcome.user_count == 0 {
                self.registry.schedule_eviction_if_empty(&room.id);
            }
        }
    }

    /// Drop a room from the sessions of every connection of a user
    async fn detach_user(&self, user_id: &str, room_id: &str) {
        let conn_ids = self.gateway.connections_for_user(user_id).await;
        let mut sessions = self.sessions.write().await;
        for conn_id in conn_ids {
            if let Some(session) = sessions.get_mut(&conn_id) {
                session.rooms.remove(room_id);
            }
        }
    }

    async fn identity(&self, conn_id: &str) -> Result<Identity> {
        let sessions = self.sessions.read().await;
        sessions
            .get(conn_id)
            .and_then(|s| s.identity.clone())
            .ok_or(ChatError::NotRegistered)
    }

    async fn broadcast_room(&self, room: &Room, event: ServerEvent, exclude: Option<&str>) {
        for user_id in room.member_ids().await {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            self.gateway.send_to_user(&user_id, event.clone()).await;
        }
    }
}

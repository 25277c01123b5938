//! Error handling for the chat engine

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat engine error types
///
/// Every rejection an operation can produce maps to exactly one variant;
/// rejections are recovered at the boundary of the operation that detected
/// them and reported back to the originating connection only.
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Action attempted before an identity was registered on the connection
    NotRegistered,
    /// Room does not exist
    RoomNotFound(String),
    /// Target user is not a member of the room
    UserNotFound(String),
    /// Message id not present in the room history
    MessageNotFound(String),
    /// Sender is banned from the room
    Banned(String),
    /// Sender is muted and the mute has not expired
    Muted(String),
    /// Room is in subscriber-only mode and the sender is not a subscriber
    SubscriberOnly(String),
    /// Caller lacks moderator privileges for the requested action
    PermissionDenied(String),
    /// Slow mode rejection, carries the remaining wait in seconds
    RateLimited { retry_after_secs: u64 },
    /// Malformed or invalid request payload
    InvalidMessage(String),
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Configuration error
    Config(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Get the stable error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::Serialization(_) => 1001,
            ChatError::Config(_) => 1002,
            ChatError::Internal(_) => 1003,
            ChatError::NotRegistered => 2000,
            ChatError::RoomNotFound(_) => 2001,
            ChatError::UserNotFound(_) => 2002,
            ChatError::MessageNotFound(_) => 2003,
            ChatError::Banned(_) => 2100,
            ChatError::Muted(_) => 2101,
            ChatError::SubscriberOnly(_) => 2102,
            ChatError::PermissionDenied(_) => 2103,
            ChatError::RateLimited { .. } => 2200,
            ChatError::InvalidMessage(_) => 2300,
        }
    }

    /// Create a room not found error
    pub fn room_not_found<T: Into<String>>(room_id: T) -> Self {
        ChatError::RoomNotFound(room_id.into())
    }

    /// Create a user not found error
    pub fn user_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::UserNotFound(msg.into())
    }

    /// Create a message not found error
    pub fn message_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::MessageNotFound(msg.into())
    }

    /// Create a banned error
    pub fn banned<T: Into<String>>(msg: T) -> Self {
        ChatError::Banned(msg.into())
    }

    /// Create a muted error
    pub fn muted<T: Into<String>>(msg: T) -> Self {
        ChatError::Muted(msg.into())
    }

    /// Create a subscriber-only error
    pub fn subscriber_only<T: Into<String>>(msg: T) -> Self {
        ChatError::SubscriberOnly(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied<T: Into<String>>(msg: T) -> Self {
        ChatError::PermissionDenied(msg.into())
    }

    /// Create a rate limited error with the remaining wait
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        ChatError::RateLimited { retry_after_secs }
    }

    /// Create an invalid message error
    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidMessage(msg.into())
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::NotRegistered => write!(f, "Register an identity first"),
            ChatError::RoomNotFound(id) => write!(f, "Room not found: {}", id),
            ChatError::UserNotFound(msg) => write!(f, "User not found: {}", msg),
            ChatError::MessageNotFound(msg) => write!(f, "Message not found: {}", msg),
            ChatError::Banned(msg) => write!(f, "You are banned: {}", msg),
            ChatError::Muted(msg) => write!(f, "You are muted: {}", msg),
            ChatError::SubscriberOnly(msg) => write!(f, "Subscribers only: {}", msg),
            ChatError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ChatError::RateLimited { retry_after_secs } => {
                write!(f, "Slow mode is enabled. Retry in {}s", retry_after_secs)
            }
            ChatError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<quinn::ConnectError> for ChatError {
    fn from(err: quinn::ConnectError) -> Self {
        ChatError::Network(format!("QUIC connect error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ChatError {
    fn from(err: quinn::ConnectionError) -> Self {
        ChatError::Network(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ChatError {
    fn from(err: quinn::ReadError) -> Self {
        ChatError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ChatError {
    fn from(err: quinn::WriteError) -> Self {
        ChatError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for ChatError {
    fn from(err: quinn::ClosedStream) -> Self {
        ChatError::Network(format!("Stream closed: {}", err))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(format!("{}", err))
    }
}

//! Server-side components: command orchestration and the QUIC endpoint

pub mod chat_server;
pub mod endpoint;

pub use chat_server::{ChatServer, ServerConfig};

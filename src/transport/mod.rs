//! Event fan-out: delivering typed events to connections

pub mod gateway;

pub use gateway::{ConnectionGateway, ConnectionId, Fanout};

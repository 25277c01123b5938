//! Wire protocol: data model, command/event unions, and frame codec

pub mod codec;
pub mod messages;

pub use codec::{encode_frame, FrameDecoder, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::*;

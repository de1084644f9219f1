//! Wire protocol: framing, messages, and payload serialization.

pub mod framing;
pub mod messages;
pub mod wire;

pub use framing::{encode_frame, Decoded, FrameCodec, RawFrame};
pub use messages::{create_version_message, Message, VersionMessage, CMD_VERACK, CMD_VERSION};

//! Protocol messages.
//!
//! Only two commands belong to the transport itself: `version` and `verack`,
//! the handshake pair. Every other command is application traffic and passes
//! through the transport opaquely as `Message::Application`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{EndpointConfig, PROTOCOL_VERSION};
use crate::error::{Error, Result};
use crate::protocol::framing::RawFrame;
use crate::protocol::wire;

/// Command name of the handshake version message.
pub const CMD_VERSION: &str = "version";

/// Command name of the handshake acknowledgement.
pub const CMD_VERACK: &str = "verack";

/// Version information exchanged during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version number.
    pub protocol_version: u32,
    /// Service-feature bitmask.
    pub services: u64,
    /// Unix timestamp when the message was created.
    pub timestamp: u64,
    /// User agent string.
    pub user_agent: String,
    /// Stream numbers the sender accepts traffic for.
    pub streams: Vec<u32>,
    /// The sender's advertised listening port.
    pub port: u16,
}

/// Create a version message from the endpoint configuration.
pub fn create_version_message(config: &EndpointConfig) -> VersionMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    VersionMessage {
        protocol_version: PROTOCOL_VERSION,
        services: config.services,
        timestamp,
        user_agent: config.user_agent.clone(),
        streams: config.streams.clone(),
        port: config.port,
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake version message.
    Version(VersionMessage),
    /// Handshake acknowledgement.
    Verack,
    /// Application message, opaque to the transport.
    Application { command: String, payload: Bytes },
}

impl Message {
    /// Get the command name for this message.
    pub fn name(&self) -> &str {
        match self {
            Message::Version(_) => CMD_VERSION,
            Message::Verack => CMD_VERACK,
            Message::Application { command, .. } => command,
        }
    }

    /// Interpret a raw frame as a protocol message.
    ///
    /// Fails with `Error::Serialization` if a `version` payload is
    /// malformed; unknown commands are passed through as application
    /// messages without inspecting their payload.
    pub fn from_frame(frame: RawFrame) -> Result<Message> {
        match frame.command.as_str() {
            CMD_VERSION => {
                let version: VersionMessage = wire::deserialize(&frame.payload)?;
                Ok(Message::Version(version))
            }
            CMD_VERACK => Ok(Message::Verack),
            _ => Ok(Message::Application {
                command: frame.command,
                payload: frame.payload,
            }),
        }
    }

    /// Encode this message into a raw frame.
    pub fn to_frame(&self) -> Result<RawFrame> {
        match self {
            Message::Version(version) => Ok(RawFrame {
                command: CMD_VERSION.to_string(),
                payload: Bytes::from(wire::serialize(version)?),
            }),
            Message::Verack => Ok(RawFrame {
                command: CMD_VERACK.to_string(),
                payload: Bytes::new(),
            }),
            Message::Application { command, payload } => Ok(RawFrame {
                command: command.clone(),
                payload: payload.clone(),
            }),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Version(v) => write!(
                f,
                "Version(protocol={}, services={}, agent={})",
                v.protocol_version, v.services, v.user_agent
            ),
            Message::Verack => write!(f, "Verack"),
            Message::Application { command, payload } => {
                write!(f, "Application({}, {} bytes)", command, payload.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_version() -> VersionMessage {
        VersionMessage {
            protocol_version: PROTOCOL_VERSION,
            services: 1,
            timestamp: 12345,
            user_agent: "/test:1.0/".to_string(),
            streams: vec![1],
            port: 8444,
        }
    }

    #[test]
    fn test_message_names() {
        assert_eq!(Message::Version(test_version()).name(), "version");
        assert_eq!(Message::Verack.name(), "verack");
        let app = Message::Application {
            command: "object".to_string(),
            payload: Bytes::new(),
        };
        assert_eq!(app.name(), "object");
    }

    #[test]
    fn test_version_frame_roundtrip() {
        let original = Message::Version(test_version());
        let frame = original.to_frame().unwrap();
        assert_eq!(frame.command, "version");

        let decoded = Message::from_frame(frame).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_verack_has_empty_payload() {
        let frame = Message::Verack.to_frame().unwrap();
        assert_eq!(frame.command, "verack");
        assert!(frame.payload.is_empty());
        assert_eq!(Message::from_frame(frame).unwrap(), Message::Verack);
    }

    #[test]
    fn test_malformed_version_payload() {
        let frame = RawFrame {
            command: "version".to_string(),
            payload: Bytes::from_static(&[0xFF, 0x01]),
        };
        assert!(matches!(
            Message::from_frame(frame),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_unknown_command_is_application() {
        let frame = RawFrame {
            command: "object".to_string(),
            payload: Bytes::from_static(b"opaque"),
        };
        let msg = Message::from_frame(frame).unwrap();
        assert!(matches!(msg, Message::Application { .. }));
    }

    #[test]
    fn test_create_version_from_config() {
        let config = EndpointConfig::new()
            .with_services(3)
            .with_user_agent("/node:2.0/")
            .with_streams(vec![1, 4])
            .with_port(9000);

        let version = create_version_message(&config);
        assert_eq!(version.protocol_version, PROTOCOL_VERSION);
        assert_eq!(version.services, 3);
        assert_eq!(version.user_agent, "/node:2.0/");
        assert_eq!(version.streams, vec![1, 4]);
        assert_eq!(version.port, 9000);
    }
}

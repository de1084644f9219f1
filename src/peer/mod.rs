//! Peer connection management.
//!
//! A peer connection pairs a handshake state machine with a tokio task that
//! owns the socket. The task speaks the wire protocol; everything above it
//! sees only commands and events.

pub mod connection;
pub mod handshake;

pub use connection::{spawn_peer_connection, PeerCommand, PeerEvent, PeerHandle};
pub use handshake::{HandshakeAction, HandshakeState, Role};

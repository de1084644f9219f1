//! peerlink: peer-to-peer transport for a binary message protocol.
//!
//! The transport moves framed, checksummed messages between peers over TCP
//! and runs the version/verack handshake on every connection. Application
//! payloads pass through opaquely; the transport only interprets the two
//! handshake commands.
//!
//! # Architecture
//!
//! ```text
//!   Dialer ──────────────┐              ┌────────────── Listener
//!     one outbound       │              │   accept loop, admission,
//!     connection         ▼              ▼   connection registry
//!                 spawn_peer_connection (task per peer)
//!                        │
//!                        ▼
//!            Framed<TcpStream, FrameCodec>
//!            handshake state machine, inactivity deadline
//! ```
//!
//! Each connection is a tokio task that owns its socket. Commands flow in
//! over an unbounded channel, events flow out over a bounded one, and the
//! task enforces a single inactivity deadline that starts short for the
//! handshake and lengthens once the link is established.
//!
//! # Example
//!
//! ```no_run
//! use peerlink::{Dialer, EndpointConfig, PeerEvent};
//!
//! # async fn example() -> peerlink::Result<()> {
//! let mut dialer = Dialer::new(EndpointConfig::default());
//! let mut events = dialer.dial("127.0.0.1:8444".parse().unwrap()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PeerEvent::Established { addr, version } => {
//!             println!("connected to {addr} ({})", version.user_agent);
//!             dialer.send("object", bytes::Bytes::from_static(b"hello"))?;
//!         }
//!         PeerEvent::Closed { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod addr;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod peer;
pub mod protocol;

pub use config::EndpointConfig;
pub use endpoint::{
    dial_seeds, ConnectionRegistry, Dialer, EndpointEvent, Listener, ListenerHandle,
};
pub use error::{Error, Result};
pub use peer::{PeerEvent, PeerHandle, Role};
pub use protocol::{Message, VersionMessage};

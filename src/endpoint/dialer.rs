//! Outbound connections.
//!
//! A `Dialer` owns exactly one outbound connection. Dialing consumes the
//! dialer's single shot whether or not the connection attempt succeeds;
//! create a fresh dialer to retry. This keeps dial-side and listen-side
//! endpoints as distinct types instead of one object that morphs modes.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::EndpointConfig;
use crate::endpoint::EVENT_CHANNEL_CAPACITY;
use crate::error::{Error, Result};
use crate::peer::{spawn_peer_connection, PeerEvent, PeerHandle, Role};

/// Dial-side transport endpoint for a single outbound connection.
#[derive(Debug)]
pub struct Dialer {
    config: Arc<EndpointConfig>,
    dialed: bool,
    handle: Option<PeerHandle>,
}

impl Dialer {
    /// Create a dialer with the given configuration.
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config: Arc::new(config),
            dialed: false,
            handle: None,
        }
    }

    /// Connect to a remote peer and start the connection task.
    ///
    /// Returns the receiver for this connection's events. A second call
    /// fails with `Error::AlreadyDialing` even if the first attempt did
    /// not connect.
    pub async fn dial(&mut self, addr: SocketAddr) -> Result<mpsc::Receiver<PeerEvent>> {
        if self.dialed {
            return Err(Error::AlreadyDialing);
        }
        self.dialed = true;

        tracing::debug!(addr = %addr, "dialing");
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout { addr })??;
        stream.set_nodelay(true)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (handle, _task) = spawn_peer_connection(
            Role::Initiator,
            stream,
            addr,
            Arc::clone(&self.config),
            event_tx,
        );
        self.handle = Some(handle);
        Ok(event_rx)
    }

    /// Send an application message to the connected peer.
    ///
    /// Fails with `Error::NotConnected` if `dial` has not succeeded or the
    /// connection has since closed.
    pub fn send(&self, command: impl Into<String>, payload: Bytes) -> Result<()> {
        match &self.handle {
            Some(handle) => handle.send(command, payload),
            None => Err(Error::NotConnected),
        }
    }

    /// Snapshot of the configured bootstrap seed addresses.
    pub fn bootstrap(&self) -> Vec<SocketAddr> {
        self.config.seeds.clone()
    }

    /// Handle to the live connection, if any.
    pub fn peer(&self) -> Option<&PeerHandle> {
        self.handle.as_ref()
    }

    /// Close the connection if one is open.
    pub fn close(&self) {
        if let Some(handle) = &self.handle {
            handle.close();
        }
    }
}

/// Dial every configured seed address.
///
/// Each seed gets its own dialer. Seeds that cannot be reached are logged
/// and skipped; the remaining sessions are returned in seed order.
pub async fn dial_seeds(config: &EndpointConfig) -> Vec<(Dialer, mpsc::Receiver<PeerEvent>)> {
    let mut sessions = Vec::with_capacity(config.seeds.len());
    for seed in &config.seeds {
        let mut dialer = Dialer::new(config.clone());
        match dialer.dial(*seed).await {
            Ok(events) => sessions.push((dialer, events)),
            Err(error) => {
                tracing::warn!(addr = %seed, error = %error, "seed unreachable");
            }
        }
    }
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_before_dial_is_not_connected() {
        let dialer = Dialer::new(EndpointConfig::default());
        assert!(matches!(
            dialer.send("object", Bytes::new()),
            Err(Error::NotConnected)
        ));
        assert!(dialer.peer().is_none());
    }

    #[test]
    fn test_bootstrap_returns_configured_seeds() {
        let seeds: Vec<SocketAddr> = vec![
            "10.0.0.1:8444".parse().unwrap(),
            "10.0.0.2:8444".parse().unwrap(),
        ];
        let dialer = Dialer::new(EndpointConfig::new().with_seeds(seeds.clone()));
        assert_eq!(dialer.bootstrap(), seeds);
    }

    #[tokio::test]
    async fn test_failed_dial_still_consumes_the_shot() {
        // Port 1 on localhost refuses connections.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut dialer = Dialer::new(EndpointConfig::default());

        assert!(dialer.dial(addr).await.is_err());
        assert!(matches!(
            dialer.dial(addr).await,
            Err(Error::AlreadyDialing)
        ));
    }
}

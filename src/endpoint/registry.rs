//! Connection registry.
//!
//! Tracks live accepted connections keyed by normalized remote host. The
//! registry is plain owned state: only the listener loop mutates it, so no
//! locking is involved. One host gets at most one entry, which is what the
//! duplicate-address admission check queries.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::Result;
use crate::peer::PeerHandle;
use crate::protocol::framing::encode_frame;

/// Live connections keyed by normalized remote host.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: HashMap<String, PeerHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Check whether a host already has a live connection.
    pub fn contains(&self, host: &str) -> bool {
        self.peers.contains_key(host)
    }

    /// Register a connection under its normalized host.
    pub fn insert(&mut self, host: String, handle: PeerHandle) -> Option<PeerHandle> {
        self.peers.insert(host, handle)
    }

    /// Remove a connection by normalized host.
    pub fn remove(&mut self, host: &str) -> Option<PeerHandle> {
        self.peers.remove(host)
    }

    /// Look up a connection by normalized host.
    pub fn get(&self, host: &str) -> Option<&PeerHandle> {
        self.peers.get(host)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remote addresses of all live connections.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.values().map(PeerHandle::addr).collect()
    }

    /// Send one message to every live connection.
    ///
    /// The frame is encoded once and the same bytes are handed to each
    /// connection task. Returns how many peers the frame was queued for;
    /// peers whose task already exited are skipped.
    pub fn broadcast(&self, command: &str, payload: &[u8]) -> Result<usize> {
        let frame = encode_frame(command, payload)?;
        let mut queued = 0;
        for handle in self.peers.values() {
            if handle.send_raw(frame.clone()).is_ok() {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Close every connection and clear the registry.
    pub fn close_all(&mut self) {
        for (_, handle) in self.peers.drain() {
            handle.close();
        }
    }
}

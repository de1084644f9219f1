//! Listen-side transport endpoint.
//!
//! The listener binds a TCP socket, admits inbound connections, and runs
//! every accepted peer as its own task. All registry mutation happens in
//! the listener loop; the outside world talks to it through a
//! `ListenerHandle` and receives `EndpointEvent`s over a single channel.
//!
//! Admission control: one live connection per normalized remote host. A
//! second connection from the same host is closed on arrival and surfaced
//! as a single warning event.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::addr;
use crate::config::EndpointConfig;
use crate::endpoint::registry::ConnectionRegistry;
use crate::endpoint::EVENT_CHANNEL_CAPACITY;
use crate::error::{Error, Result};
use crate::peer::{spawn_peer_connection, PeerEvent, PeerHandle, Role};

/// Event emitted by a running listener.
#[derive(Debug)]
pub enum EndpointEvent {
    /// An inbound connection was admitted and registered. The handle sends
    /// to this peer individually; broadcast goes through the listener.
    Connection {
        peer: PeerHandle,
        addr: SocketAddr,
        host: String,
    },
    /// An event from one of the accepted peers.
    Peer(PeerEvent),
    /// The listener shut down; all connections are closed.
    Closed,
}

/// Control command for a running listener.
#[derive(Debug)]
pub enum ListenerCommand {
    /// Send one message to every live connection.
    Broadcast { command: String, payload: Bytes },
    /// Close all connections and stop the listener.
    Shutdown,
}

/// Cloneable control handle to a running listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    control_tx: mpsc::UnboundedSender<ListenerCommand>,
}

impl ListenerHandle {
    /// Broadcast an application message to every live connection.
    pub fn broadcast(&self, command: impl Into<String>, payload: Bytes) -> Result<()> {
        self.control_tx
            .send(ListenerCommand::Broadcast {
                command: command.into(),
                payload,
            })
            .map_err(|_| Error::NotConnected)
    }

    /// Stop the listener and close all connections.
    pub fn shutdown(&self) {
        let _ = self.control_tx.send(ListenerCommand::Shutdown);
    }
}

/// Listen-side transport endpoint.
#[derive(Debug)]
pub struct Listener {
    config: Arc<EndpointConfig>,
    control_tx: mpsc::UnboundedSender<ListenerCommand>,
    control_rx: mpsc::UnboundedReceiver<ListenerCommand>,
    event_tx: mpsc::Sender<EndpointEvent>,
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
    bound_addr_rx: Option<oneshot::Receiver<SocketAddr>>,
}

impl Listener {
    /// Create a listener and the receiver for its events.
    pub fn new(config: EndpointConfig) -> (Self, mpsc::Receiver<EndpointEvent>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (bound_addr_tx, bound_addr_rx) = oneshot::channel();

        let listener = Self {
            config: Arc::new(config),
            control_tx,
            control_rx,
            event_tx,
            bound_addr_tx: Some(bound_addr_tx),
            bound_addr_rx: Some(bound_addr_rx),
        };
        (listener, event_rx)
    }

    /// Control handle for broadcasting and shutdown.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            control_tx: self.control_tx.clone(),
        }
    }

    /// Receiver resolved with the bound address once `run` has bound the
    /// socket. Useful when listening on port 0.
    pub fn bound_addr_receiver(&mut self) -> Option<oneshot::Receiver<SocketAddr>> {
        self.bound_addr_rx.take()
    }

    /// Snapshot of the configured bootstrap seed addresses.
    pub fn bootstrap(&self) -> Vec<SocketAddr> {
        self.config.seeds.clone()
    }

    /// Bind the socket and run the accept loop until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        let socket = TcpListener::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        tracing::info!(addr = %local_addr, "listening");

        if let Some(tx) = self.bound_addr_tx.take() {
            let _ = tx.send(local_addr);
        }

        let mut registry = ConnectionRegistry::new();
        // Peer tasks report here; the loop prunes the registry on close and
        // forwards everything to the application channel.
        let (peer_tx, mut peer_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        loop {
            tokio::select! {
                accepted = socket.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let host = addr::normalize(&remote_addr);
                        if registry.contains(&host) {
                            tracing::warn!(
                                addr = %remote_addr,
                                host = %host,
                                "duplicate connection from host, rejecting"
                            );
                            drop(stream);
                            let _ = self.event_tx.send(EndpointEvent::Peer(PeerEvent::Warning {
                                addr: remote_addr,
                                error: Error::DuplicateAddress { host },
                            })).await;
                            continue;
                        }

                        tracing::debug!(addr = %remote_addr, "inbound connection");
                        let _ = stream.set_nodelay(true);
                        let (handle, _task) = spawn_peer_connection(
                            Role::Acceptor,
                            stream,
                            remote_addr,
                            Arc::clone(&self.config),
                            peer_tx.clone(),
                        );
                        registry.insert(host.clone(), handle.clone());
                        let _ = self.event_tx.send(EndpointEvent::Connection {
                            peer: handle,
                            addr: remote_addr,
                            host,
                        }).await;
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "accept failed");
                    }
                },

                event = peer_rx.recv() => {
                    // peer_tx is held above, so recv never yields None here.
                    if let Some(event) = event {
                        if let PeerEvent::Closed { addr, .. } = &event {
                            registry.remove(&addr::normalize(addr));
                        }
                        let _ = self.event_tx.send(EndpointEvent::Peer(event)).await;
                    }
                }

                command = self.control_rx.recv() => match command {
                    Some(ListenerCommand::Broadcast { command, payload }) => {
                        match registry.broadcast(&command, &payload) {
                            Ok(queued) => {
                                tracing::debug!(command = %command, peers = queued, "broadcast");
                            }
                            Err(error) => {
                                tracing::warn!(error = %error, "broadcast rejected");
                            }
                        }
                    }
                    Some(ListenerCommand::Shutdown) | None => {
                        tracing::info!(addr = %local_addr, "listener shutting down");
                        registry.close_all();
                        let _ = self.event_tx.send(EndpointEvent::Closed).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

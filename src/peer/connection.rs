//! Per-peer connection task.
//!
//! Each connection runs in its own tokio task owning the framed stream.
//! Commands go in over an unbounded channel (sends never block the caller);
//! lifecycle and message events come out over a bounded channel. A single
//! inactivity deadline guards the connection: short until the handshake
//! completes, long afterwards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::Framed;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::peer::handshake::{HandshakeAction, HandshakeState, Role};
use crate::protocol::framing::{Decoded, FrameCodec};
use crate::protocol::messages::{create_version_message, Message, VersionMessage};

/// Command sent to a connection task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Encode and send an application message.
    Send { command: String, payload: Bytes },
    /// Write a pre-encoded frame (broadcast path; encoded once upstream).
    SendRaw(Bytes),
    /// Close the connection.
    Close,
}

/// Event emitted by a connection task.
#[derive(Debug)]
pub enum PeerEvent {
    /// The channel opened (initiator side).
    Open { addr: SocketAddr },
    /// Handshake complete; carries the peer's version message.
    Established {
        addr: SocketAddr,
        version: VersionMessage,
    },
    /// An application message arrived.
    Message {
        addr: SocketAddr,
        command: String,
        payload: Bytes,
    },
    /// A non-fatal protocol violation; the connection stays open.
    Warning { addr: SocketAddr, error: Error },
    /// A transport failure; does not by itself close the connection.
    Error { addr: SocketAddr, error: Error },
    /// The connection is gone.
    Closed { addr: SocketAddr, reason: String },
}

/// Cheap cloneable handle to a connection task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub(crate) addr: SocketAddr,
    pub(crate) command_tx: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    /// Remote address of the connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send an application message to this peer.
    ///
    /// Fails with `Error::NotConnected` if the connection task has exited.
    pub fn send(&self, command: impl Into<String>, payload: Bytes) -> Result<()> {
        self.command_tx
            .send(PeerCommand::Send {
                command: command.into(),
                payload,
            })
            .map_err(|_| Error::NotConnected)
    }

    /// Write a pre-encoded frame to this peer.
    pub(crate) fn send_raw(&self, frame: Bytes) -> Result<()> {
        self.command_tx
            .send(PeerCommand::SendRaw(frame))
            .map_err(|_| Error::NotConnected)
    }

    /// Request the connection to close.
    pub fn close(&self) {
        let _ = self.command_tx.send(PeerCommand::Close);
    }

    /// Check whether the connection task is still running.
    pub fn is_connected(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

/// Spawn a connection task over an open TCP stream.
///
/// For an acceptor the stream is already open, so the open transition is
/// applied synthetically before the event loop starts.
pub fn spawn_peer_connection(
    role: Role,
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<EndpointConfig>,
    event_tx: mpsc::Sender<PeerEvent>,
) -> (PeerHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = PeerHandle { addr, command_tx };
    let task = tokio::spawn(run_connection(
        role, stream, addr, config, event_tx, command_rx,
    ));
    (handle, task)
}

async fn run_connection(
    role: Role,
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<EndpointConfig>,
    event_tx: mpsc::Sender<PeerEvent>,
    mut command_rx: mpsc::UnboundedReceiver<PeerCommand>,
) {
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut state = HandshakeState::new();
    let mut remote_version: Option<VersionMessage> = None;
    let mut idle = config.handshake_timeout;
    let mut deadline = Instant::now() + idle;

    tracing::debug!(addr = %addr, role = %role, "connection opened");
    if role == Role::Initiator {
        let _ = event_tx.send(PeerEvent::Open { addr }).await;
    }

    let open_actions = state.on_open(role);
    apply_actions(
        open_actions,
        &mut framed,
        &config,
        addr,
        &event_tx,
        &remote_version,
        &mut idle,
        &mut deadline,
    )
    .await;

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                tracing::debug!(addr = %addr, state = %state, "inactivity timeout, closing");
                state.on_close();
                let _ = event_tx.send(PeerEvent::Closed {
                    addr,
                    reason: "timeout".to_string(),
                }).await;
                return;
            }

            command = command_rx.recv() => match command {
                Some(PeerCommand::Send { command, payload }) => {
                    let message = Message::Application { command, payload };
                    match send_message(&mut framed, &message).await {
                        Ok(()) => deadline = Instant::now() + idle,
                        Err(error) => {
                            tracing::warn!(addr = %addr, error = %error, "failed to send message");
                            let _ = event_tx.send(PeerEvent::Error { addr, error }).await;
                        }
                    }
                }
                Some(PeerCommand::SendRaw(bytes)) => {
                    match send_raw(&mut framed, &bytes).await {
                        Ok(()) => deadline = Instant::now() + idle,
                        Err(error) => {
                            tracing::warn!(addr = %addr, error = %error, "failed to send frame");
                            let _ = event_tx.send(PeerEvent::Error { addr, error }).await;
                        }
                    }
                }
                Some(PeerCommand::Close) | None => {
                    tracing::debug!(addr = %addr, "closing connection");
                    state.on_close();
                    let _ = event_tx.send(PeerEvent::Closed {
                        addr,
                        reason: "closed by local endpoint".to_string(),
                    }).await;
                    return;
                }
            },

            frame = framed.next() => match frame {
                None => {
                    state.on_close();
                    let _ = event_tx.send(PeerEvent::Closed {
                        addr,
                        reason: "connection closed by peer".to_string(),
                    }).await;
                    return;
                }
                Some(Err(error)) => {
                    // Write failures are survivable, but a read error means
                    // the stream is dead. Surface the error, then the close.
                    tracing::warn!(addr = %addr, error = %error, "transport error");
                    let _ = event_tx.send(PeerEvent::Error { addr, error }).await;
                    state.on_close();
                    let _ = event_tx.send(PeerEvent::Closed {
                        addr,
                        reason: "transport error".to_string(),
                    }).await;
                    return;
                }
                Some(Ok(Decoded::Invalid(error))) => {
                    tracing::warn!(addr = %addr, error = %error, "protocol violation");
                    let _ = event_tx.send(PeerEvent::Warning { addr, error }).await;
                }
                Some(Ok(Decoded::Frame(raw))) => {
                    deadline = Instant::now() + idle;
                    match Message::from_frame(raw) {
                        Err(error) => {
                            tracing::warn!(addr = %addr, error = %error, "undecodable payload");
                            let _ = event_tx.send(PeerEvent::Warning { addr, error }).await;
                        }
                        Ok(Message::Version(version)) => {
                            if remote_version.is_none() {
                                remote_version = Some(version);
                            }
                            let actions = state.on_version(role);
                            apply_actions(
                                actions,
                                &mut framed,
                                &config,
                                addr,
                                &event_tx,
                                &remote_version,
                                &mut idle,
                                &mut deadline,
                            )
                            .await;
                        }
                        Ok(Message::Verack) => {
                            let actions = state.on_verack();
                            apply_actions(
                                actions,
                                &mut framed,
                                &config,
                                addr,
                                &event_tx,
                                &remote_version,
                                &mut idle,
                                &mut deadline,
                            )
                            .await;
                        }
                        Ok(Message::Application { command, payload }) => {
                            let _ = event_tx.send(PeerEvent::Message {
                                addr,
                                command,
                                payload,
                            }).await;
                        }
                    }
                }
            },
        }
    }
}

/// Carry out the side effects requested by a handshake transition.
#[allow(clippy::too_many_arguments)]
async fn apply_actions(
    actions: Vec<HandshakeAction>,
    framed: &mut Framed<TcpStream, FrameCodec>,
    config: &EndpointConfig,
    addr: SocketAddr,
    event_tx: &mpsc::Sender<PeerEvent>,
    remote_version: &Option<VersionMessage>,
    idle: &mut Duration,
    deadline: &mut Instant,
) {
    for action in actions {
        match action {
            HandshakeAction::SendVersion => {
                let message = Message::Version(create_version_message(config));
                if let Err(error) = send_message(framed, &message).await {
                    tracing::warn!(addr = %addr, error = %error, "failed to send version");
                    let _ = event_tx.send(PeerEvent::Error { addr, error }).await;
                }
            }
            HandshakeAction::SendVerack => {
                if let Err(error) = send_message(framed, &Message::Verack).await {
                    tracing::warn!(addr = %addr, error = %error, "failed to send verack");
                    let _ = event_tx.send(PeerEvent::Error { addr, error }).await;
                }
            }
            HandshakeAction::Establish => {
                // Escalate the inactivity deadline from the handshake value
                // to the keepalive grace period.
                *idle = config.idle_timeout;
                *deadline = Instant::now() + *idle;
                if let Some(version) = remote_version.clone() {
                    tracing::debug!(
                        addr = %addr,
                        agent = %version.user_agent,
                        "peer link established"
                    );
                    let _ = event_tx
                        .send(PeerEvent::Established { addr, version })
                        .await;
                }
            }
        }
    }
}

async fn send_message(
    framed: &mut Framed<TcpStream, FrameCodec>,
    message: &Message,
) -> Result<()> {
    let frame = message.to_frame()?;
    framed.send(frame).await
}

async fn send_raw(framed: &mut Framed<TcpStream, FrameCodec>, bytes: &[u8]) -> Result<()> {
    // Every framed send flushes, so the codec write buffer is empty here
    // and the raw frame cannot interleave with a partial write.
    let stream = framed.get_mut();
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

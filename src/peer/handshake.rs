//! Handshake state machine.
//!
//! The handshake is two independent one-way acknowledgements: each side
//! sends `version` and answers the other's `version` with `verack`. The
//! link is established once a side has both sent and received a `verack`,
//! whichever order the messages arrive in. The connecting side speaks
//! first; an acceptor defers its own `version` until it has seen the
//! initiator's.

use std::fmt;

/// Which side opened the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This side dialed the connection.
    Initiator,
    /// This side accepted the connection.
    Acceptor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Side effects requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send our `version` message.
    SendVersion,
    /// Acknowledge the peer's `version`.
    SendVerack,
    /// Both acknowledgements are in; the link is established.
    Establish,
}

/// State of the handshake for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Channel not yet open.
    AwaitingOpen,
    /// Channel open, exchanging version/verack.
    VersionPending {
        /// We have acknowledged the peer's `version`.
        verack_sent: bool,
        /// The peer has acknowledged ours.
        verack_received: bool,
    },
    /// Handshake complete; application traffic flows.
    Established,
    /// Channel gone.
    Closed,
}

impl HandshakeState {
    /// Initial state for a fresh connection.
    pub fn new() -> Self {
        Self::AwaitingOpen
    }

    /// Channel opened (or, for an acceptor, the synthetic open on accept).
    ///
    /// The initiator speaks first and sends its `version` immediately.
    pub fn on_open(&mut self, role: Role) -> Vec<HandshakeAction> {
        match *self {
            Self::AwaitingOpen => {
                *self = Self::VersionPending {
                    verack_sent: false,
                    verack_received: false,
                };
                match role {
                    Role::Initiator => vec![HandshakeAction::SendVersion],
                    Role::Acceptor => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// A `version` message arrived.
    ///
    /// The first `version` is acknowledged; an acceptor also replies with
    /// its own `version`. Any later duplicate is ignored, and after
    /// establishment the message is dropped entirely.
    pub fn on_version(&mut self, role: Role) -> Vec<HandshakeAction> {
        match *self {
            Self::VersionPending {
                verack_sent: false,
                verack_received,
            } => {
                let mut actions = vec![HandshakeAction::SendVerack];
                if role == Role::Acceptor {
                    actions.push(HandshakeAction::SendVersion);
                }
                *self = Self::VersionPending {
                    verack_sent: true,
                    verack_received,
                };
                if let Some(action) = self.settle() {
                    actions.push(action);
                }
                actions
            }
            _ => Vec::new(),
        }
    }

    /// A `verack` message arrived.
    pub fn on_verack(&mut self) -> Vec<HandshakeAction> {
        match *self {
            Self::VersionPending { verack_sent, .. } => {
                *self = Self::VersionPending {
                    verack_sent,
                    verack_received: true,
                };
                self.settle().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Channel closed.
    pub fn on_close(&mut self) {
        *self = Self::Closed;
    }

    /// Move to Established if both acknowledgements are in.
    ///
    /// Fires at most once: the transition out of `VersionPending` makes
    /// every later `version`/`verack` a no-op.
    fn settle(&mut self) -> Option<HandshakeAction> {
        if let Self::VersionPending {
            verack_sent: true,
            verack_received: true,
        } = *self
        {
            *self = Self::Established;
            Some(HandshakeAction::Establish)
        } else {
            None
        }
    }

    /// Check if the handshake is complete.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingOpen => write!(f, "awaiting_open"),
            Self::VersionPending {
                verack_sent,
                verack_received,
            } => write!(
                f,
                "version_pending(sent={}, received={})",
                verack_sent, verack_received
            ),
            Self::Established => write!(f, "established"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

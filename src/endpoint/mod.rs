//! Transport endpoints.
//!
//! Dial-side and listen-side endpoints are distinct types: a `Dialer` owns
//! one outbound connection, a `Listener` owns its accepted connections and
//! their registry. Neither changes mode after creation.

pub mod dialer;
pub mod listener;
pub mod registry;

pub use dialer::{dial_seeds, Dialer};
pub use listener::{EndpointEvent, Listener, ListenerCommand, ListenerHandle};
pub use registry::ConnectionRegistry;

/// Capacity of the event channels between connection tasks and consumers.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

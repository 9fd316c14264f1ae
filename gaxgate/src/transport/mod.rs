//! Transport provider interface and the bundled tokio implementation.
//!
//! The relay core is single threaded and event driven. Everything that
//! opens channels or waits for I/O goes through a [`Reactor`], an explicit
//! context object created once by the program and passed by reference to
//! every component that needs it.

pub mod endpoint;
mod reactor;

pub use endpoint::Endpoint;
pub use reactor::{TokioAccepter, TokioReactor};

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::channel::{Channel, ChannelId};
use crate::error::ChannelError;

/// Something that happened on a channel or accepter.
pub enum Event {
    /// An `open` finished, successfully or not.
    Opened(ChannelId, Result<(), ChannelError>),

    /// Data arrived, or reading failed.
    Readable(ChannelId, Result<Bytes, ChannelError>),

    /// The channel can accept writes (while write readiness is enabled).
    Writable(ChannelId),

    /// A `close` finished. No further events follow for this channel.
    Closed(ChannelId),

    /// An accepter produced a new, already open channel.
    Accepted(Box<dyn Channel>),

    /// An accepter finished shutting down.
    AccepterShutdown,

    /// The user asked the program to stop.
    Interrupt,
}

impl Event {
    /// The channel this event concerns, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Event::Opened(id, _) | Event::Readable(id, _) => Some(*id),
            Event::Writable(id) | Event::Closed(id) => Some(*id),
            Event::Accepted(_) | Event::AccepterShutdown | Event::Interrupt => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Opened(id, result) => f.debug_tuple("Opened").field(id).field(result).finish(),
            Event::Readable(id, Ok(data)) => f
                .debug_tuple("Readable")
                .field(id)
                .field(&data.len())
                .finish(),
            Event::Readable(id, Err(e)) => f.debug_tuple("Readable").field(id).field(e).finish(),
            Event::Writable(id) => f.debug_tuple("Writable").field(id).finish(),
            Event::Closed(id) => f.debug_tuple("Closed").field(id).finish(),
            Event::Accepted(channel) => f.debug_tuple("Accepted").field(&channel.id()).finish(),
            Event::AccepterShutdown => f.write_str("AccepterShutdown"),
            Event::Interrupt => f.write_str("Interrupt"),
        }
    }
}

/// The event source and channel factory shared by all components.
pub trait Reactor {
    /// Create a channel for `target` and begin opening it.
    ///
    /// Errors returned here are synchronous (for example an unparseable
    /// connection string); asynchronous failures arrive as an `Opened` event
    /// carrying the error.
    fn open(&mut self, target: &str) -> Result<Box<dyn Channel>, ChannelError>;

    /// Wait up to `timeout` for the next event.
    fn wait(&mut self, timeout: Duration) -> Option<Event>;

    /// Current time as seen by the reactor.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Accepts inbound channels.
pub trait Accepter {
    /// Start accepting. New channels arrive as `Event::Accepted`.
    fn startup(&mut self) -> Result<(), ChannelError>;

    /// Stop accepting. Completion arrives as `Event::AccepterShutdown`.
    fn shutdown(&mut self);
}

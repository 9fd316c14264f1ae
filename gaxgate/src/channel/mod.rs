//! Channel abstraction consumed by the relay core.
//!
//! A channel is an addressed, asynchronously operated I/O endpoint: a radio
//! link, a stream socket or the pipes of a spawned program. The core never
//! performs I/O itself; it reacts to [`Event`](crate::transport::Event)s and
//! drives channels through this trait.

mod buffer;
mod patterns;

pub use buffer::LineBuffer;
pub use patterns::LoginPrompt;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ChannelError;

/// Process-unique identity of a channel.
///
/// Events carry the id of the channel they concern; sessions compare ids to
/// find out which of their legs an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// An asynchronously operated I/O endpoint.
///
/// All methods are non-blocking. Completion of `open` and `close` is
/// reported later through `Opened` and `Closed` events; readiness is
/// reported through `Readable` and `Writable` events while enabled.
pub trait Channel {
    /// Identity of this channel.
    fn id(&self) -> ChannelId;

    /// Write as much of `data` as the channel accepts right now.
    ///
    /// Returns the number of bytes accepted, which may be less than
    /// `data.len()`.
    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError>;

    /// Enable or disable `Readable` notifications.
    fn set_read_enabled(&mut self, enabled: bool);

    /// Enable or disable `Writable` notifications.
    fn set_write_enabled(&mut self, enabled: bool);

    /// Begin closing the channel. A `Closed` event follows.
    fn close(&mut self);

    /// Local address of the channel, if it has one.
    fn local_address(&self) -> Option<String>;

    /// Address of the remote party, if known.
    fn remote_address(&self) -> Option<String>;
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("remote", &self.remote_address())
            .finish()
    }
}

/// Strip the SSID from a station address: `KF7HVM-10` becomes `KF7HVM`.
pub fn base_callsign(address: &str) -> &str {
    address.split('-').next().unwrap_or(address)
}

//! Bidirectional, flow-controlled byte relay between two channels.
//!
//! A [`Relay`] owns up to two channels, the primary and the secondary leg,
//! and copies bytes between them. Bytes read from one leg are queued for the
//! other and written out as that leg becomes writable, in order and without
//! loss. When either leg ends, the relay drains whatever is still queued for
//! the surviving leg before closing it.
//!
//! Session behavior is layered on top through the [`Session`] trait: the
//! relay is the innermost session, and [`CredentialGate`] and
//! [`LoginFilter`] change how input is routed before it reaches the relay.

mod gate;
mod login;

pub use gate::{CREDENTIAL_PROMPTS, CredentialGate};
pub use login::{DEFAULT_PASSWORD, LoginCredentials, LoginFilter};

use std::fmt;

use bytes::{Buf, BytesMut};
use log::{debug, error, info, trace, warn};

use crate::channel::{Channel, ChannelId};
use crate::error::ChannelError;
use crate::transport::{Event, Reactor};

/// One of the two legs of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The inbound side: the accepted connection or the modem data port.
    Primary,
    /// The downstream side: the spawned program or gateway connection.
    Secondary,
}

impl Slot {
    /// The opposite leg.
    pub fn other(self) -> Slot {
        match self {
            Slot::Primary => Slot::Secondary,
            Slot::Secondary => Slot::Primary,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Primary => f.write_str("primary"),
            Slot::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Default)]
struct Leg {
    channel: Option<Box<dyn Channel>>,

    /// Bytes waiting to be written to this leg.
    outgoing: BytesMut,

    /// Reading or writing failed; nothing more is written to this leg.
    errored: bool,

    /// `close` has been issued and the `Closed` event is outstanding.
    close_issued: bool,
}

impl Leg {
    fn enable_write(&mut self) {
        if self.errored || self.close_issued {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.set_write_enabled(true);
        }
    }

    fn clear(&mut self) {
        self.channel = None;
        self.outgoing.clear();
        self.errored = false;
        self.close_issued = false;
    }
}

/// A byte pipe between a primary and a secondary channel.
pub struct Relay {
    name: String,
    primary: Leg,
    secondary: Leg,

    /// Channels detached by `reset` whose `Closed` is still outstanding.
    retired: Vec<Box<dyn Channel>>,

    /// Set once either leg ended: legs close as soon as they are drained.
    closing: bool,

    /// Secondary target opened by `start`.
    target: Option<String>,

    /// Leg whose close is reported to the owner instead of performed.
    deferred: Option<Slot>,
    close_requested: bool,
}

impl Relay {
    /// Create an empty relay. `name` prefixes its log lines.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: Leg::default(),
            secondary: Leg::default(),
            retired: Vec::new(),
            closing: false,
            target: None,
            deferred: None,
            close_requested: false,
        }
    }

    /// Open `target` as the secondary leg when the relay is started.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn leg(&self, slot: Slot) -> &Leg {
        match slot {
            Slot::Primary => &self.primary,
            Slot::Secondary => &self.secondary,
        }
    }

    fn leg_mut(&mut self, slot: Slot) -> &mut Leg {
        match slot {
            Slot::Primary => &mut self.primary,
            Slot::Secondary => &mut self.secondary,
        }
    }

    /// Install an already created channel as `slot`.
    ///
    /// A channel still occupying the slot is closed and retired first.
    pub fn attach(&mut self, slot: Slot, channel: Box<dyn Channel>) {
        if self.leg(slot).channel.is_some() {
            warn!("{} {}: replacing attached channel", self.name, slot);
            self.reset(slot);
        }
        debug!("{} {}: attached {}", self.name, slot, channel.id());
        let leg = self.leg_mut(slot);
        leg.channel = Some(channel);
        leg.errored = false;
        leg.close_issued = false;
    }

    /// Open the configured secondary target, if any.
    pub fn start(&mut self, reactor: &mut dyn Reactor) {
        if let Some(target) = self.target.take() {
            // Failure is logged and already closed the primary leg
            let _ = self.connect(reactor, Slot::Secondary, &target);
        }
    }

    /// Open `target` and install it as `slot`.
    ///
    /// If the reactor refuses synchronously, every leg that exists is closed
    /// and the error is returned.
    pub fn connect(
        &mut self,
        reactor: &mut dyn Reactor,
        slot: Slot,
        target: &str,
    ) -> Result<(), ChannelError> {
        info!("{} {}: opening {}", self.name, slot, target);
        match reactor.open(target) {
            Ok(channel) => {
                self.attach(slot, channel);
                Ok(())
            }
            Err(e) => {
                error!("{} {}: open error: {}", self.name, slot, e);
                self.close_existing();
                Err(e)
            }
        }
    }

    /// Which leg `id` is attached to.
    pub fn slot_of(&self, id: ChannelId) -> Option<Slot> {
        [Slot::Primary, Slot::Secondary]
            .into_iter()
            .find(|slot| self.leg(*slot).channel.as_ref().map(|c| c.id()) == Some(id))
    }

    /// Whether `id` is attached or retired and awaiting its close.
    pub fn owns(&self, id: ChannelId) -> bool {
        self.slot_of(id).is_some() || self.retired.iter().any(|c| c.id() == id)
    }

    /// Channel attached to `slot`.
    pub fn channel(&self, slot: Slot) -> Option<&(dyn Channel + 'static)> {
        self.leg(slot).channel.as_deref()
    }

    /// Mutable channel attached to `slot`.
    pub fn channel_mut(&mut self, slot: Slot) -> Option<&mut (dyn Channel + 'static)> {
        self.leg_mut(slot).channel.as_deref_mut()
    }

    pub fn is_attached(&self, slot: Slot) -> bool {
        self.leg(slot).channel.is_some()
    }

    pub fn is_errored(&self, slot: Slot) -> bool {
        self.leg(slot).errored
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Bytes queued for `slot` and not yet written.
    pub fn pending(&self, slot: Slot) -> &[u8] {
        &self.leg(slot).outgoing
    }

    /// Ids of every channel this relay still expects events for.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        [&self.primary, &self.secondary]
            .into_iter()
            .filter_map(|leg| leg.channel.as_ref().map(|c| c.id()))
            .chain(self.retired.iter().map(|c| c.id()))
            .collect()
    }

    /// No channels left and no close confirmations outstanding.
    pub fn is_finished(&self) -> bool {
        self.primary.channel.is_none() && self.secondary.channel.is_none() && self.retired.is_empty()
    }

    /// Queue `data` to be written to `slot`.
    pub fn enqueue(&mut self, slot: Slot, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let leg = self.leg_mut(slot);
        leg.outgoing.extend_from_slice(data);
        leg.enable_write();
    }

    /// Turn write notifications off on both legs until [`resume_writes`].
    ///
    /// Queued bytes are kept.
    ///
    /// [`resume_writes`]: Relay::resume_writes
    pub fn pause_writes(&mut self) {
        for leg in [&mut self.primary, &mut self.secondary] {
            if let Some(channel) = leg.channel.as_mut() {
                channel.set_write_enabled(false);
            }
        }
    }

    /// Turn write notifications back on for every leg with work left.
    pub fn resume_writes(&mut self) {
        let closing = self.closing;
        for leg in [&mut self.primary, &mut self.secondary] {
            if closing || !leg.outgoing.is_empty() {
                leg.enable_write();
            }
        }
    }

    /// Report close requests for `slot` through [`take_close_request`]
    /// instead of closing it. `None` lifts the deferral.
    ///
    /// [`take_close_request`]: Relay::take_close_request
    pub fn defer_close(&mut self, slot: Option<Slot>) {
        self.deferred = slot;
    }

    /// Whether a close of the deferred leg was requested since the last call.
    pub fn take_close_request(&mut self) -> bool {
        std::mem::take(&mut self.close_requested)
    }

    /// Detach the channel in `slot` so the leg can be opened again.
    ///
    /// The detached channel is closed if it was not already and tracked
    /// until its `Closed` arrives. Data queued for the slot is discarded and
    /// the relay is no longer closing.
    pub fn reset(&mut self, slot: Slot) {
        self.close_leg(slot);
        let leg = self.leg_mut(slot);
        let channel = leg.channel.take();
        leg.clear();
        if let Some(channel) = channel {
            debug!("{} {}: retired {}", self.name, slot, channel.id());
            self.retired.push(channel);
        }
        self.closing = false;
    }

    /// Begin closing the relay.
    ///
    /// Every leg is flushed and closes once drained. If `slot` is given, that
    /// leg is closed right away without waiting for its queue.
    pub fn close(&mut self, slot: Option<Slot>) {
        if let Some(slot) = slot {
            if self.deferred == Some(slot) {
                debug!("{} {}: close requested", self.name, slot);
                self.close_requested = true;
                return;
            }
        }

        self.closing = true;
        self.primary.enable_write();
        self.secondary.enable_write();
        if let Some(slot) = slot {
            self.close_leg(slot);
        }
    }

    fn close_existing(&mut self) {
        for slot in [Slot::Primary, Slot::Secondary] {
            if self.is_attached(slot) {
                self.close(Some(slot));
            }
        }
    }

    fn close_leg(&mut self, slot: Slot) {
        let name = &self.name;
        let leg = match slot {
            Slot::Primary => &mut self.primary,
            Slot::Secondary => &mut self.secondary,
        };
        if leg.close_issued {
            return;
        }
        if let Some(channel) = leg.channel.as_mut() {
            debug!("{} {}: closing {}", name, slot, channel.id());
            leg.close_issued = true;
            channel.close();
        }
    }

    /// Handle completion of an `open`.
    pub fn on_opened(&mut self, id: ChannelId, result: Result<(), ChannelError>) {
        let Some(slot) = self.slot_of(id) else {
            trace!("{}: open completion for unknown {}", self.name, id);
            return;
        };

        match result {
            Ok(()) => {
                debug!("{} {}: opened {}", self.name, slot, id);
                if let Some(channel) = self.leg_mut(slot).channel.as_mut() {
                    channel.set_write_enabled(true);
                    channel.set_read_enabled(true);
                }
            }
            Err(e) => {
                error!("{} {}: open error: {}", self.name, slot, e);
                // A failed open is final, no Closed follows
                self.leg_mut(slot).channel = None;
                self.close_existing();
            }
        }
    }

    /// Handle data read from `id`, queueing it for the other leg.
    ///
    /// Returns the number of bytes consumed.
    pub fn on_readable(&mut self, id: ChannelId, result: Result<&[u8], ChannelError>) -> usize {
        let Some(slot) = self.slot_of(id) else {
            trace!("{}: read on unknown {}", self.name, id);
            return result.map(|data| data.len()).unwrap_or(0);
        };

        match result {
            Ok(data) => {
                if !data.is_empty() {
                    trace!("{} {}: read {} bytes", self.name, slot, data.len());
                    self.enqueue(slot.other(), data);
                }
                data.len()
            }
            Err(e) => {
                if e.is_remote_closed() {
                    debug!("{} {}: {}", self.name, slot, e);
                } else {
                    warn!("{} {}: read error: {}", self.name, slot, e);
                }
                self.leg_mut(slot).errored = true;
                self.close(Some(slot));
                0
            }
        }
    }

    /// Write queued bytes to `id`.
    pub fn on_writable(&mut self, id: ChannelId) {
        let Some(slot) = self.slot_of(id) else {
            trace!("{}: writable on unknown {}", self.name, id);
            return;
        };

        let name = &self.name;
        let leg = match slot {
            Slot::Primary => &mut self.primary,
            Slot::Secondary => &mut self.secondary,
        };
        if leg.close_issued {
            return;
        }
        let Some(channel) = leg.channel.as_mut() else {
            return;
        };

        if !leg.errored && !leg.outgoing.is_empty() {
            match channel.write(&leg.outgoing) {
                Ok(count) => {
                    trace!("{} {}: wrote {} bytes", name, slot, count);
                    leg.outgoing.advance(count);
                }
                Err(e) => {
                    warn!("{} {}: write error: {}", name, slot, e);
                    leg.errored = true;
                    leg.outgoing.clear();
                    self.close(Some(slot));
                    return;
                }
            }
        }

        if leg.errored || leg.outgoing.is_empty() {
            channel.set_write_enabled(false);
            if self.closing {
                self.close(Some(slot));
            }
        }
    }

    /// Handle completion of a `close`.
    pub fn on_closed(&mut self, id: ChannelId) {
        if let Some(index) = self.retired.iter().position(|c| c.id() == id) {
            self.retired.swap_remove(index);
            debug!("{}: retired {} closed", self.name, id);
        } else if let Some(slot) = self.slot_of(id) {
            debug!("{} {}: closed {}", self.name, slot, id);
            self.leg_mut(slot).clear();
        } else {
            trace!("{}: close completion for unknown {}", self.name, id);
            return;
        }

        if self.is_finished() {
            debug!("{}: finished", self.name);
        }
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("name", &self.name)
            .field("primary", &self.primary.channel.as_ref().map(|c| c.id()))
            .field("secondary", &self.secondary.channel.as_ref().map(|c| c.id()))
            .field("retired", &self.retired.len())
            .field("closing", &self.closing)
            .finish()
    }
}

/// A relay with session behavior layered on top.
///
/// Every handler has a default that forwards to the [`Relay`]; decorators
/// override the handlers they care about and forward the rest to the session
/// they wrap.
pub trait Session {
    fn relay(&self) -> &Relay;

    fn relay_mut(&mut self) -> &mut Relay;

    /// Called once after the primary leg is attached.
    fn start(&mut self, reactor: &mut dyn Reactor) {
        self.relay_mut().start(reactor);
    }

    fn on_opened(
        &mut self,
        _reactor: &mut dyn Reactor,
        id: ChannelId,
        result: Result<(), ChannelError>,
    ) {
        self.relay_mut().on_opened(id, result);
    }

    /// Returns the number of bytes consumed.
    fn on_readable(
        &mut self,
        _reactor: &mut dyn Reactor,
        id: ChannelId,
        result: Result<&[u8], ChannelError>,
    ) -> usize {
        self.relay_mut().on_readable(id, result)
    }

    fn on_writable(&mut self, _reactor: &mut dyn Reactor, id: ChannelId) {
        self.relay_mut().on_writable(id);
    }

    fn on_closed(&mut self, _reactor: &mut dyn Reactor, id: ChannelId) {
        self.relay_mut().on_closed(id);
    }

    /// Force-close the session: flush and close both legs.
    fn close(&mut self) {
        self.relay_mut().close(None);
    }

    fn is_finished(&self) -> bool {
        self.relay().is_finished()
    }

    /// Route a channel event to the matching handler.
    fn handle(&mut self, reactor: &mut dyn Reactor, event: Event) {
        match event {
            Event::Opened(id, result) => self.on_opened(reactor, id, result),
            Event::Readable(id, Ok(data)) => {
                let consumed = self.on_readable(reactor, id, Ok(&data[..]));
                if consumed < data.len() {
                    warn!(
                        "{}: dropped {} unconsumed bytes",
                        self.relay().name(),
                        data.len() - consumed
                    );
                }
            }
            Event::Readable(id, Err(e)) => {
                let _ = self.on_readable(reactor, id, Err(e));
            }
            Event::Writable(id) => self.on_writable(reactor, id),
            Event::Closed(id) => self.on_closed(reactor, id),
            other => trace!("{}: ignoring {:?}", self.relay().name(), other),
        }
    }
}

impl Session for Relay {
    fn relay(&self) -> &Relay {
        self
    }

    fn relay_mut(&mut self) -> &mut Relay {
        self
    }
}

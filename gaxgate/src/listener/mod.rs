//! Accept inbound connections and run one session per connection.
//!
//! The listener owns the accepter and every live session. Channel events are
//! routed to the session owning the channel; a session is dropped once all
//! of its channels have confirmed their close. Shutdown stops the accepter
//! and force-closes every session, and the listener is finished when both
//! have completed.

mod builder;
mod factory;

pub use builder::ListenerBuilder;
pub use factory::{GatedSessions, SessionFactory, SpawnSessions};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelId};
use crate::error::ChannelError;
use crate::relay::{Session, Slot};
use crate::transport::{Accepter, Event, Reactor};

/// How long `run` waits for each event.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Identity of a session within a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// Accept loop and registry of live sessions.
pub struct Listener {
    accepter: Option<Box<dyn Accepter>>,
    factory: Box<dyn SessionFactory>,
    sessions: IndexMap<SessionId, Box<dyn Session>>,
    routes: HashMap<ChannelId, SessionId>,
    next_id: u64,
    shutting_down: bool,
    abandoned: bool,
}

impl Listener {
    pub fn new(accepter: Box<dyn Accepter>, factory: Box<dyn SessionFactory>) -> Self {
        Self {
            accepter: Some(accepter),
            factory,
            sessions: IndexMap::new(),
            routes: HashMap::new(),
            next_id: 0,
            shutting_down: false,
            abandoned: false,
        }
    }

    /// Start accepting connections.
    pub fn startup(&mut self) -> Result<(), ChannelError> {
        match self.accepter.as_mut() {
            Some(accepter) => accepter.startup(),
            None => Err(ChannelError::Closed),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ids of live sessions in acceptance order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// No sessions remain and the accepter has shut down.
    pub fn is_finished(&self) -> bool {
        self.sessions.is_empty() && self.accepter.is_none()
    }

    /// Create a session for a newly accepted channel and start it.
    pub fn accept(&mut self, reactor: &mut dyn Reactor, mut channel: Box<dyn Channel>) {
        if self.shutting_down {
            debug!("shutting down, dropping connection from {:?}", channel.remote_address());
            channel.close();
            return;
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        info!(
            "{}: accepted connection from {}",
            id,
            channel.remote_address().as_deref().unwrap_or("unknown")
        );

        let mut session = self.factory.create(id, channel.as_ref());
        session.relay_mut().attach(Slot::Primary, channel);
        session.start(reactor);
        // Accepted channels are already open, no Opened event follows
        if let Some(inbound) = session.relay_mut().channel_mut(Slot::Primary) {
            inbound.set_write_enabled(true);
            inbound.set_read_enabled(true);
        }

        self.sessions.insert(id, session);
        self.refresh(id);
    }

    /// Stop accepting and force-close every session but `except`.
    pub fn shutdown(&mut self, except: Option<SessionId>) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("shutting down {} sessions", self.sessions.len());

        if let Some(accepter) = self.accepter.as_mut() {
            accepter.shutdown();
        }
        for (id, session) in self.sessions.iter_mut() {
            if Some(*id) != except {
                session.close();
            }
        }
    }

    /// Dispatch one event.
    pub fn handle(&mut self, reactor: &mut dyn Reactor, event: Event) {
        match event {
            Event::Accepted(channel) => self.accept(reactor, channel),
            Event::AccepterShutdown => {
                info!("accepter shut down");
                self.accepter = None;
            }
            Event::Interrupt => {
                if self.shutting_down {
                    warn!("interrupted again, giving up on {} sessions", self.sessions.len());
                    self.abandoned = true;
                } else {
                    info!("interrupted, shutting down");
                    self.shutdown(None);
                }
            }
            event => {
                let Some(channel) = event.channel() else {
                    return;
                };
                let Some(id) = self.routes.get(&channel).copied() else {
                    trace!("event for untracked {}: {:?}", channel, event);
                    return;
                };
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.handle(reactor, event);
                }
                self.refresh(id);
            }
        }
    }

    /// Update routes after a session handled an event, dropping it if done.
    fn refresh(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if session.is_finished() {
            self.session_closed(id);
            return;
        }

        let channels = session.relay().channel_ids();
        self.routes
            .retain(|channel, owner| *owner != id || channels.contains(channel));
        for channel in channels {
            self.routes.insert(channel, id);
        }
    }

    fn session_closed(&mut self, id: SessionId) {
        if self.sessions.shift_remove(&id).is_some() {
            self.routes.retain(|_, owner| *owner != id);
            info!("{}: closed, {} remaining", id, self.sessions.len());
        }
    }

    /// Process events until finished, or until a second interrupt.
    pub fn run(&mut self, reactor: &mut dyn Reactor) {
        while !self.is_finished() && !self.abandoned {
            if let Some(event) = reactor.wait(WAIT_SLICE) {
                self.handle(reactor, event);
            }
        }
        debug!("listener finished");
    }
}

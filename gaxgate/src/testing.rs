//! In-memory channels and reactor for unit tests.
//!
//! `MockReactor` hands out `MockChannel`s whose state is shared with the
//! test through `MockHandle`s. Its `wait` replays scripted events first, then
//! canned replies whose trigger has been written, then confirms outstanding
//! closes, then reports write readiness for every open channel with writes
//! enabled. When nothing is left it advances its clock
//! by the requested timeout and returns `None`.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::channel::{Channel, ChannelId};
use crate::error::ChannelError;
use crate::relay::Session;
use crate::transport::{Accepter, Event, Reactor};

/// Observable state of a mock channel.
#[derive(Debug, Default)]
pub struct MockState {
    pub written: Vec<u8>,
    pub read_enabled: bool,
    pub write_enabled: bool,
    pub open: bool,
    pub close_calls: usize,
    /// `Closed` has been delivered.
    pub closed: bool,
    /// Accept at most this many bytes per write.
    pub accept_limit: Option<usize>,
    pub fail_writes: bool,
    pub remote: Option<String>,
}

pub type MockHandle = Rc<RefCell<MockState>>;

pub struct MockChannel {
    id: ChannelId,
    state: MockHandle,
}

impl MockChannel {
    pub fn new() -> (Self, MockHandle) {
        let state = MockHandle::default();
        let channel = Self {
            id: ChannelId::next(),
            state: state.clone(),
        };
        (channel, state)
    }
}

impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        let count = state.accept_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.extend_from_slice(&data[..count]);
        Ok(count)
    }

    fn set_read_enabled(&mut self, enabled: bool) {
        self.state.borrow_mut().read_enabled = enabled;
    }

    fn set_write_enabled(&mut self, enabled: bool) {
        self.state.borrow_mut().write_enabled = enabled;
    }

    fn close(&mut self) {
        self.state.borrow_mut().close_calls += 1;
    }

    fn local_address(&self) -> Option<String> {
        None
    }

    fn remote_address(&self) -> Option<String> {
        self.state.borrow().remote.clone()
    }
}

pub struct MockReactor {
    pub now: Instant,
    /// Calls to `wait` so far.
    pub waits: usize,
    events: VecDeque<Event>,
    channels: Vec<(ChannelId, MockHandle)>,
    opened: Vec<(String, ChannelId)>,
    refused: HashSet<String>,
    failing: HashSet<String>,
    replies: Vec<Reply>,
}

/// Canned input delivered once `trigger` has been written to a channel.
struct Reply {
    id: ChannelId,
    trigger: Vec<u8>,
    response: Bytes,
    fired: bool,
}

impl MockReactor {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            waits: 0,
            events: VecDeque::new(),
            channels: Vec::new(),
            opened: Vec::new(),
            refused: HashSet::new(),
            failing: HashSet::new(),
            replies: Vec::new(),
        }
    }

    /// Make `open` fail synchronously for `target`.
    pub fn refuse(&mut self, target: &str) {
        self.refused.insert(target.to_string());
    }

    /// Make `open` report an asynchronous failure for `target`.
    pub fn fail_async(&mut self, target: &str) {
        self.failing.insert(target.to_string());
    }

    /// Create an already open channel, as an accepter would.
    pub fn accepted(&mut self, remote: &str) -> (Box<dyn Channel>, ChannelId, MockHandle) {
        let (channel, state) = MockChannel::new();
        {
            let mut state = state.borrow_mut();
            state.open = true;
            state.remote = Some(remote.to_string());
        }
        let id = channel.id();
        self.channels.push((id, state.clone()));
        (Box::new(channel), id, state)
    }

    /// Deliver `response` from `id` after `trigger` was written to it.
    pub fn reply_to(&mut self, id: ChannelId, trigger: &str, response: &str) {
        self.replies.push(Reply {
            id,
            trigger: trigger.as_bytes().to_vec(),
            response: Bytes::copy_from_slice(response.as_bytes()),
            fired: false,
        });
    }

    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn readable(&mut self, id: ChannelId, data: &[u8]) {
        self.push(Event::Readable(id, Ok(Bytes::copy_from_slice(data))));
    }

    /// Id of the most recent channel opened for `target`.
    pub fn opened_id(&self, target: &str) -> Option<ChannelId> {
        self.opened
            .iter()
            .rev()
            .find(|(t, _)| t == target)
            .map(|(_, id)| *id)
    }

    /// Targets opened so far, in order.
    pub fn opened_targets(&self) -> Vec<String> {
        self.opened.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn state(&self, id: ChannelId) -> MockHandle {
        self.channels
            .iter()
            .find(|(channel, _)| *channel == id)
            .map(|(_, state)| state.clone())
            .expect("unknown mock channel")
    }
}

impl Reactor for MockReactor {
    fn open(&mut self, target: &str) -> Result<Box<dyn Channel>, ChannelError> {
        if self.refused.contains(target) {
            return Err(ChannelError::InvalidTarget(target.to_string()));
        }
        let (channel, state) = MockChannel::new();
        let id = channel.id();
        self.channels.push((id, state));
        self.opened.push((target.to_string(), id));
        let result = if self.failing.contains(target) {
            Err(ChannelError::OpenFailed {
                target: target.to_string(),
                message: "refused".to_string(),
            })
        } else {
            Ok(())
        };
        self.events.push_back(Event::Opened(id, result));
        Ok(Box::new(channel))
    }

    fn wait(&mut self, timeout: Duration) -> Option<Event> {
        self.waits += 1;
        if let Some(event) = self.events.pop_front() {
            if let Event::Opened(id, Ok(())) = &event {
                self.state(*id).borrow_mut().open = true;
            }
            return Some(event);
        }

        for index in 0..self.replies.len() {
            let reply = &self.replies[index];
            let triggered = !reply.fired
                && self
                    .state(reply.id)
                    .borrow()
                    .written
                    .windows(reply.trigger.len())
                    .any(|window| window == reply.trigger.as_slice());
            if triggered {
                let reply = &mut self.replies[index];
                reply.fired = true;
                return Some(Event::Readable(reply.id, Ok(reply.response.clone())));
            }
        }

        for (id, state) in &self.channels {
            let mut state = state.borrow_mut();
            if state.close_calls > 0 && !state.closed {
                state.closed = true;
                state.open = false;
                return Some(Event::Closed(*id));
            }
        }

        for (id, state) in &self.channels {
            let state = state.borrow();
            if state.open && state.write_enabled && state.close_calls == 0 {
                return Some(Event::Writable(*id));
            }
        }

        self.now += timeout;
        None
    }

    fn now(&self) -> Instant {
        self.now
    }
}

#[derive(Debug, Default)]
pub struct MockAccepter {
    pub started: bool,
    pub shutdowns: usize,
}

impl Accepter for Rc<RefCell<MockAccepter>> {
    fn startup(&mut self) -> Result<(), ChannelError> {
        self.borrow_mut().started = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.borrow_mut().shutdowns += 1;
    }
}

const SETTLE_LIMIT: usize = 10_000;

/// Feed events to `session` until the reactor is idle.
pub fn drain<S: Session + ?Sized>(reactor: &mut MockReactor, session: &mut S) {
    for _ in 0..SETTLE_LIMIT {
        match reactor.wait(Duration::ZERO) {
            Some(event) => session.handle(reactor, event),
            None => return,
        }
    }
    panic!("event loop did not settle");
}

/// Everything written to `id` so far.
pub fn written(reactor: &MockReactor, id: ChannelId) -> String {
    String::from_utf8_lossy(&reactor.state(id).borrow().written).into_owned()
}

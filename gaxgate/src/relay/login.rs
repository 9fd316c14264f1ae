//! Automatic Winlink RMS gateway login.
//!
//! A CMS gateway greets a telnet client with `Callsign :` and `Password :`
//! prompts. Radio clients expect to be logged in already, so the filter
//! answers both prompts on behalf of the station and hides the exchange
//! from the radio side.

use bytes::BytesMut;
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};

use super::{Relay, Session, Slot};
use crate::channel::{ChannelId, LineBuffer, LoginPrompt, base_callsign};
use crate::error::ChannelError;
use crate::transport::Reactor;

/// Password CMS expects from telnet gateway clients.
pub const DEFAULT_PASSWORD: &str = "CMSTelnet";

/// Identity presented to the gateway.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    callsign: String,
    password: SecretString,
}

impl LoginCredentials {
    pub fn new(callsign: impl Into<String>, password: SecretString) -> Self {
        Self {
            callsign: callsign.into(),
            password,
        }
    }

    /// Credentials for a station address, SSID stripped, default password.
    pub fn for_station(address: &str) -> Self {
        Self::new(base_callsign(address), SecretString::from(DEFAULT_PASSWORD))
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }
}

/// Session decorator that performs the gateway login on the gated leg.
///
/// Until the password has been sent, everything read from the gated leg is
/// consumed here. Bytes following the password prompt pass through.
pub struct LoginFilter<S> {
    inner: S,
    gated: Slot,
    credentials: LoginCredentials,
    logged_in: bool,
    lines: LineBuffer,

    /// Gated channel the login state belongs to.
    gated_channel: Option<ChannelId>,
}

impl<S: Session> LoginFilter<S> {
    pub fn new(inner: S, gated: Slot, credentials: LoginCredentials) -> Self {
        Self {
            inner,
            gated,
            credentials,
            logged_in: false,
            lines: LineBuffer::new(),
            gated_channel: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Start over when a different channel occupies the gated leg.
    fn sync_gated_channel(&mut self) {
        let current = self.inner.relay().channel(self.gated).map(|c| c.id());
        if current != self.gated_channel {
            if self.logged_in || !self.lines.is_empty() {
                debug!("{} {}: login state reset", self.inner.relay().name(), self.gated);
            }
            self.gated_channel = current;
            self.logged_in = false;
            self.lines.clear();
        }
    }

    fn answer(&mut self, prompt: LoginPrompt) {
        info!(
            "{} {}: answering {:?} prompt for {}",
            self.inner.relay().name(),
            self.gated,
            prompt,
            self.credentials.callsign
        );
        let reply = match prompt {
            LoginPrompt::Callsign => format!("{}\r\n", self.credentials.callsign),
            LoginPrompt::Password => {
                self.logged_in = true;
                format!("{}\r\n", self.credentials.password.expose_secret())
            }
        };
        self.inner.relay_mut().enqueue(self.gated, reply.as_bytes());
    }

    /// Consume pre-login input, returning whatever follows the login.
    fn filter(&mut self, data: &[u8]) -> BytesMut {
        self.lines.extend(data);
        while !self.logged_in {
            if let Some(line) = self.lines.next_line() {
                match LoginPrompt::from_line(line.as_bytes()) {
                    Some(prompt) => self.answer(prompt),
                    None => debug!("{}: discarding {:?}", self.inner.relay().name(), line),
                }
                continue;
            }

            match LoginPrompt::from_partial(self.lines.pending()) {
                Some(prompt) => {
                    self.lines.clear();
                    self.answer(prompt);
                }
                None => return BytesMut::new(),
            }
        }

        let mut rest = self.lines.take();
        let skip = rest.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
        let _ = rest.split_to(skip);
        rest
    }
}

impl<S: Session> Session for LoginFilter<S> {
    fn relay(&self) -> &Relay {
        self.inner.relay()
    }

    fn relay_mut(&mut self) -> &mut Relay {
        self.inner.relay_mut()
    }

    fn start(&mut self, reactor: &mut dyn Reactor) {
        self.inner.start(reactor);
    }

    fn on_opened(
        &mut self,
        reactor: &mut dyn Reactor,
        id: ChannelId,
        result: Result<(), ChannelError>,
    ) {
        self.inner.on_opened(reactor, id, result);
        self.sync_gated_channel();
    }

    fn on_readable(
        &mut self,
        reactor: &mut dyn Reactor,
        id: ChannelId,
        result: Result<&[u8], ChannelError>,
    ) -> usize {
        self.sync_gated_channel();
        let gated = self.inner.relay().slot_of(id) == Some(self.gated);
        match result {
            Ok(data) if gated && !self.logged_in => {
                let rest = self.filter(data);
                if !rest.is_empty() {
                    self.inner.on_readable(reactor, id, Ok(&rest[..]));
                }
                data.len()
            }
            result => self.inner.on_readable(reactor, id, result),
        }
    }

    fn on_writable(&mut self, reactor: &mut dyn Reactor, id: ChannelId) {
        self.inner.on_writable(reactor, id);
    }

    fn on_closed(&mut self, reactor: &mut dyn Reactor, id: ChannelId) {
        self.inner.on_closed(reactor, id);
        self.sync_gated_channel();
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

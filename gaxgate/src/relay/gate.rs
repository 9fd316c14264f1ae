//! Credential gate: collect input before opening the downstream leg.
//!
//! The inbound side is prompted for a fixed number of credentials, one per
//! read. Once all have arrived the downstream target is built from the
//! template by positional substitution and opened.

use log::{debug, info};

use super::{Relay, Session, Slot};
use crate::channel::ChannelId;
use crate::error::ChannelError;
use crate::target::substitute_positional;
use crate::transport::Reactor;

/// Prompts sent to the inbound side while collecting credentials.
pub const CREDENTIAL_PROMPTS: [&[u8]; 2] = [b"Callsign :\r", b"Password :\r"];

/// Session that opens its secondary leg only after collecting credentials.
pub struct CredentialGate {
    relay: Relay,
    template: String,
    required: usize,
    collected: Vec<String>,
}

impl CredentialGate {
    /// Create a gate collecting `required` credentials for `template`.
    ///
    /// With a single credential only the password prompt is shown; with
    /// more the prompts alternate starting with the callsign.
    pub fn new(name: impl Into<String>, template: impl Into<String>, required: usize) -> Self {
        let mut relay = Relay::new(name);
        match required {
            0 => {}
            1 => relay.enqueue(Slot::Primary, CREDENTIAL_PROMPTS[1]),
            _ => relay.enqueue(Slot::Primary, CREDENTIAL_PROMPTS[0]),
        }
        Self {
            relay,
            template: template.into(),
            required,
            collected: Vec::new(),
        }
    }

    /// Credentials received so far.
    pub fn collected(&self) -> &[String] {
        &self.collected
    }

    pub fn is_complete(&self) -> bool {
        self.collected.len() >= self.required
    }

    fn spawn_when_ready(&mut self, reactor: &mut dyn Reactor) {
        if !self.is_complete()
            || self.relay.is_closing()
            || self.relay.is_attached(Slot::Secondary)
            || !self.relay.is_attached(Slot::Primary)
        {
            return;
        }
        let target = substitute_positional(&self.template, &self.collected);
        info!("{}: credentials complete", self.relay.name());
        // Failure is logged and closes the inbound leg
        let _ = self.relay.connect(reactor, Slot::Secondary, &target);
    }
}

impl Session for CredentialGate {
    fn relay(&self) -> &Relay {
        &self.relay
    }

    fn relay_mut(&mut self) -> &mut Relay {
        &mut self.relay
    }

    fn start(&mut self, reactor: &mut dyn Reactor) {
        self.spawn_when_ready(reactor);
    }

    fn on_readable(
        &mut self,
        reactor: &mut dyn Reactor,
        id: ChannelId,
        result: Result<&[u8], ChannelError>,
    ) -> usize {
        let inbound = self.relay.slot_of(id) == Some(Slot::Primary);
        let consumed = match result {
            Ok(data) if inbound && !self.is_complete() => {
                if !data.is_empty() {
                    let credential = String::from_utf8_lossy(data).trim().to_string();
                    self.collected.push(credential);
                    debug!(
                        "{}: credential {} of {} received",
                        self.relay.name(),
                        self.collected.len(),
                        self.required
                    );
                    if !self.is_complete() {
                        let prompt = CREDENTIAL_PROMPTS[self.collected.len() % CREDENTIAL_PROMPTS.len()];
                        self.relay.enqueue(Slot::Primary, prompt);
                    }
                }
                data.len()
            }
            result => self.relay.on_readable(id, result),
        };
        self.spawn_when_ready(reactor);
        consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockReactor, drain, written};

    const TEMPLATE: &str = "ax25(addr=\"0,%0,N0CALL\"),pw=%1";

    fn gated(reactor: &mut MockReactor, required: usize) -> (CredentialGate, ChannelId) {
        let (inbound, inbound_id, state) = reactor.accepted("127.0.0.1:40000");
        let mut gate = CredentialGate::new("gate", TEMPLATE, required);
        gate.relay_mut().attach(Slot::Primary, inbound);
        gate.start(reactor);
        state.borrow_mut().write_enabled = true;
        drain(reactor, &mut gate);
        (gate, inbound_id)
    }

    #[test]
    fn test_opens_after_two_credentials() {
        let mut reactor = MockReactor::new();
        let (mut gate, inbound) = gated(&mut reactor, 2);
        assert_eq!(written(&reactor, inbound), "Callsign :\r");

        reactor.readable(inbound, b"W1AW-10\r\n");
        drain(&mut reactor, &mut gate);
        assert_eq!(written(&reactor, inbound), "Callsign :\rPassword :\r");
        assert!(reactor.opened_targets().is_empty());

        reactor.readable(inbound, b"secret\r\n");
        drain(&mut reactor, &mut gate);
        assert_eq!(gate.collected(), ["W1AW-10", "secret"]);
        assert_eq!(
            reactor.opened_targets(),
            vec!["ax25(addr=\"0,W1AW-10,N0CALL\"),pw=secret"]
        );

        // Later input is relayed, not collected
        let downstream = reactor.opened_id(&reactor.opened_targets()[0]).unwrap();
        reactor.readable(inbound, b"hello\r");
        drain(&mut reactor, &mut gate);
        assert_eq!(written(&reactor, downstream), "hello\r");
    }

    #[test]
    fn test_single_credential_prompts_password() {
        let mut reactor = MockReactor::new();
        let (mut gate, inbound) = gated(&mut reactor, 1);
        assert_eq!(written(&reactor, inbound), "Password :\r");

        reactor.readable(inbound, b"KF7HVM-10\r");
        drain(&mut reactor, &mut gate);
        assert_eq!(
            reactor.opened_targets(),
            vec!["ax25(addr=\"0,KF7HVM-10,N0CALL\"),pw=%1"]
        );
    }

    #[test]
    fn test_no_credentials_opens_immediately() {
        let mut reactor = MockReactor::new();
        let (_gate, inbound) = gated(&mut reactor, 0);
        assert_eq!(written(&reactor, inbound), "");
        assert_eq!(reactor.opened_targets().len(), 1);
    }

    #[test]
    fn test_three_credentials_alternate_prompts() {
        let mut reactor = MockReactor::new();
        let (mut gate, inbound) = gated(&mut reactor, 3);
        for credential in [&b"a\r"[..], b"b\r"] {
            reactor.readable(inbound, credential);
            drain(&mut reactor, &mut gate);
        }
        assert_eq!(written(&reactor, inbound), "Callsign :\rPassword :\rCallsign :\r");
        assert!(reactor.opened_targets().is_empty());
    }

    #[test]
    fn test_hangup_before_credentials() {
        let mut reactor = MockReactor::new();
        let (mut gate, inbound) = gated(&mut reactor, 2);
        reactor.push(crate::transport::Event::Readable(inbound, Err(ChannelError::RemoteClosed)));
        drain(&mut reactor, &mut gate);

        assert!(gate.is_finished());
        assert!(reactor.opened_targets().is_empty());
    }
}

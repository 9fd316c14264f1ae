//! Session factories used by the listener.

use secrecy::SecretString;

use super::SessionId;
use crate::channel::{Channel, base_callsign};
use crate::relay::{CredentialGate, LoginCredentials, LoginFilter, Relay, Session, Slot};
use crate::target::substitute_peer;

/// Builds the session for a freshly accepted channel.
pub trait SessionFactory {
    fn create(&mut self, id: SessionId, inbound: &dyn Channel) -> Box<dyn Session>;
}

/// Relay every accepted connection to a program or gateway.
///
/// The target may use ax25d-style peer placeholders. With a login password
/// set, the downstream leg is treated as an RMS gateway and logged in as the
/// connecting station.
#[derive(Debug)]
pub struct SpawnSessions {
    target: String,
    banner: Option<String>,
    login: Option<SecretString>,
}

impl SpawnSessions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            banner: None,
            login: None,
        }
    }

    /// Line sent to each inbound station before anything else.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Log in to the gateway with this password.
    pub fn login(mut self, password: SecretString) -> Self {
        self.login = Some(password);
        self
    }
}

impl SessionFactory for SpawnSessions {
    fn create(&mut self, id: SessionId, inbound: &dyn Channel) -> Box<dyn Session> {
        let remote = inbound.remote_address().unwrap_or_default();
        let target = substitute_peer(&self.target, &remote);
        let mut relay = Relay::new(id.to_string()).with_target(target);
        if let Some(banner) = &self.banner {
            relay.enqueue(Slot::Primary, format!("{banner}\r\n").as_bytes());
        }

        match &self.login {
            Some(password) => Box::new(LoginFilter::new(
                relay,
                Slot::Secondary,
                LoginCredentials::new(base_callsign(&remote), password.clone()),
            )),
            None => Box::new(relay),
        }
    }
}

/// Collect credentials from each connection before opening the target.
#[derive(Debug)]
pub struct GatedSessions {
    template: String,
    required: usize,
}

impl GatedSessions {
    pub fn new(template: impl Into<String>, required: usize) -> Self {
        Self {
            template: template.into(),
            required,
        }
    }
}

impl SessionFactory for GatedSessions {
    fn create(&mut self, id: SessionId, _inbound: &dyn Channel) -> Box<dyn Session> {
        Box::new(CredentialGate::new(
            id.to_string(),
            self.template.clone(),
            self.required,
        ))
    }
}

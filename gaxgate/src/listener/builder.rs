//! Builder for listeners.

use secrecy::SecretString;

use super::{GatedSessions, Listener, SessionFactory, SpawnSessions};
use crate::error::ConfigError;
use crate::relay::DEFAULT_PASSWORD;
use crate::target::GatewayTarget;
use crate::transport::Accepter;

/// Builder for constructing a [`Listener`].
///
/// Either spawn a target per connection, optionally through the RMS login,
/// or collect credentials first and fill them into a target template.
#[derive(Default)]
pub struct ListenerBuilder {
    target: Option<String>,
    banner: Option<String>,
    credentials: Option<usize>,
    password: Option<SecretString>,
}

impl ListenerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target opened for each connection. Peer placeholders such as `%U`
    /// are substituted; an `rms,` prefix enables the gateway login.
    pub fn spawn(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Line sent to each inbound connection first.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Prompt for `count` credentials and substitute them into the target
    /// as `%0`, `%1`, ...
    pub fn require_credentials(mut self, count: usize) -> Self {
        self.credentials = Some(count);
        self
    }

    /// Password for the gateway login (default: `CMSTelnet`).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Build the listener around `accepter`.
    pub fn build(self, accepter: Box<dyn Accepter>) -> Result<Listener, ConfigError> {
        let target = self.target.ok_or(ConfigError::Missing("spawn"))?;
        if target.trim().is_empty() {
            return Err(ConfigError::Missing("spawn"));
        }
        let gateway = GatewayTarget::parse(&target);

        let factory: Box<dyn SessionFactory> = match self.credentials {
            Some(count) => {
                if gateway.login {
                    return Err(ConfigError::Invalid {
                        name: "spawn",
                        message: "gateway login cannot be combined with credential prompts"
                            .to_string(),
                    });
                }
                if self.banner.is_some() {
                    return Err(ConfigError::Invalid {
                        name: "banner",
                        message: "not supported with credential prompts".to_string(),
                    });
                }
                Box::new(GatedSessions::new(gateway.target, count))
            }
            None => {
                let mut sessions = SpawnSessions::new(gateway.target);
                if let Some(banner) = self.banner {
                    sessions = sessions.banner(banner);
                }
                if gateway.login {
                    let password = self
                        .password
                        .unwrap_or_else(|| SecretString::from(DEFAULT_PASSWORD));
                    sessions = sessions.login(password);
                }
                Box::new(sessions)
            }
        };

        Ok(Listener::new(accepter, factory))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::testing::MockAccepter;

    fn accepter() -> Box<dyn Accepter> {
        Box::new(Rc::new(RefCell::new(MockAccepter::default())))
    }

    #[test]
    fn test_requires_target() {
        assert!(matches!(
            ListenerBuilder::new().build(accepter()),
            Err(ConfigError::Missing("spawn"))
        ));
    }

    #[test]
    fn test_rejects_login_with_credentials() {
        let result = ListenerBuilder::new()
            .spawn("rms,tcp,cms.winlink.org,8772")
            .require_credentials(2)
            .build(accepter());
        assert!(matches!(result, Err(ConfigError::Invalid { name: "spawn", .. })));
    }

    #[test]
    fn test_builds_spawning_listener() {
        let listener = ListenerBuilder::new()
            .spawn("stdio,cat")
            .banner("hello")
            .build(accepter())
            .unwrap();
        assert_eq!(listener.session_count(), 0);
        assert!(!listener.is_finished());
    }
}

//! Builder for modem control sessions.

use std::time::Duration;

use secrecy::SecretString;

use super::config::ModemConfig;
use super::control::ControlChannel;
use crate::error::ConfigError;
use crate::target::GatewayTarget;

/// Builder for constructing a [`ControlChannel`].
///
/// # Example
///
/// ```rust
/// use gaxgate::modem::ModemBuilder;
///
/// let modem = ModemBuilder::new("N0CALL-10")
///     .tcp("localhost", 8300)
///     .gateway("rms,tcp,cms.winlink.org,8772")
///     .build()
///     .unwrap();
/// assert_eq!(modem.config().data_target, "tcp,localhost,8301");
/// ```
pub struct ModemBuilder {
    config: ModemConfig,
    control_target: Option<String>,
    data_target: Option<String>,
    password: SecretString,
    login: bool,
}

impl ModemBuilder {
    /// Create a builder for the station `local_address`.
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            config: ModemConfig {
                local_address: local_address.into(),
                ..ModemConfig::default()
            },
            control_target: None,
            data_target: None,
            password: SecretString::from(crate::relay::DEFAULT_PASSWORD),
            login: false,
        }
    }

    /// Modem reachable over TCP, data port one above the control port.
    pub fn tcp(mut self, host: &str, control_port: u16) -> Self {
        let (control, data) = ModemConfig::tcp_targets(host, control_port);
        self.control_target = Some(control);
        self.data_target = Some(data);
        self
    }

    /// Set the control port connection string.
    pub fn control(mut self, target: impl Into<String>) -> Self {
        self.control_target = Some(target.into());
        self
    }

    /// Set the data port connection string.
    pub fn data(mut self, target: impl Into<String>) -> Self {
        self.data_target = Some(target.into());
        self
    }

    /// Target opened per radio connection (default: the console).
    pub fn spawn(mut self, target: impl Into<String>) -> Self {
        self.config.spawn_target = target.into();
        self
    }

    /// Gateway opened per radio connection. An `rms,` prefix enables the
    /// gateway login.
    pub fn gateway(mut self, target: &str) -> Self {
        let gateway = GatewayTarget::parse(target);
        self.config.spawn_target = gateway.target;
        self.login = gateway.login;
        self
    }

    /// Password for the gateway login (default: `CMSTelnet`).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = SecretString::from(password.into());
        self
    }

    /// Line sent to each radio peer once connected.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.config.banner = Some(banner.into());
        self
    }

    /// Time the modem gets to confirm a disconnect.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    /// Wait slice while polling for a disconnect confirmation.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build the control session.
    ///
    /// Nothing is opened until [`ControlChannel::start`] is called.
    pub fn build(self) -> Result<ControlChannel, ConfigError> {
        let mut config = self.config;

        if config.local_address.trim().is_empty() {
            return Err(ConfigError::Missing("local address"));
        }
        if config.local_address.split_whitespace().count() != 1 {
            return Err(ConfigError::Invalid {
                name: "local address",
                message: format!("'{}' contains whitespace", config.local_address),
            });
        }
        config.control_target = self.control_target.ok_or(ConfigError::Missing("control"))?;
        config.data_target = self.data_target.ok_or(ConfigError::Missing("data"))?;
        if config.spawn_target.is_empty() {
            return Err(ConfigError::Missing("spawn"));
        }
        if config.disconnect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "disconnect timeout",
                message: "must be greater than zero".to_string(),
            });
        }
        if config.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "poll interval",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.login {
            config.login = Some(self.password);
        }

        Ok(ControlChannel::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_targets() {
        assert!(matches!(
            ModemBuilder::new("N0CALL").build(),
            Err(ConfigError::Missing("control"))
        ));
        assert!(matches!(
            ModemBuilder::new("N0CALL").control("tcp,localhost,8300").build(),
            Err(ConfigError::Missing("data"))
        ));
        assert!(matches!(
            ModemBuilder::new(" ").tcp("localhost", 8300).build(),
            Err(ConfigError::Missing("local address"))
        ));
    }

    #[test]
    fn test_gateway_prefix_enables_login() {
        let modem = ModemBuilder::new("N0CALL-10")
            .tcp("vara.local", 8300)
            .gateway("rms,tcp,cms.winlink.org,8772")
            .build()
            .unwrap();
        assert_eq!(modem.config().spawn_target, "tcp,cms.winlink.org,8772");
        assert!(modem.config().login.is_some());

        let modem = ModemBuilder::new("N0CALL-10")
            .tcp("vara.local", 8300)
            .gateway("tcp,telehack.com,23")
            .build()
            .unwrap();
        assert!(modem.config().login.is_none());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = ModemBuilder::new("N0CALL")
            .tcp("localhost", 8300)
            .disconnect_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}

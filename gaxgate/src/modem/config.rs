//! Modem gateway configuration.

use std::time::Duration;

use secrecy::SecretString;

/// Target spawned for each radio session when none is configured.
pub const DEFAULT_SPAWN: &str = "stdio(self)";

/// Default time the modem gets to confirm a disconnect.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default slice the disconnect poll waits for each event.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Modem control session configuration.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Station address announced with `MYCALL`.
    pub local_address: String,

    /// Connection string of the modem control port.
    pub control_target: String,

    /// Connection string of the modem data port.
    pub data_target: String,

    /// Target opened for every radio connection.
    pub spawn_target: String,

    /// Line sent to the radio peer when a connection is established.
    pub banner: Option<String>,

    /// Log in to an RMS gateway with this password.
    pub login: Option<SecretString>,

    /// Time the modem gets to confirm a disconnect.
    pub disconnect_timeout: Duration,

    /// Wait slice while polling for the disconnect confirmation.
    pub poll_interval: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            local_address: String::new(),
            control_target: String::new(),
            data_target: String::new(),
            spawn_target: DEFAULT_SPAWN.to_string(),
            banner: None,
            login: None,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ModemConfig {
    /// Control and data targets for a modem at `host`, whose data port
    /// follows the control port.
    pub fn tcp_targets(host: &str, control_port: u16) -> (String, String) {
        let data_port = control_port.saturating_add(1);
        (
            format!("tcp,{host},{control_port}"),
            format!("tcp,{host},{data_port}"),
        )
    }

    /// Escalate to `ABORT` after this long without a confirmation.
    pub fn abort_after(&self) -> Duration {
        self.disconnect_timeout * 9 / 10
    }
}

//! Connection strings understood by the bundled transport.
//!
//! The syntax follows gensio's comma separated style:
//!
//! - `tcp,<host>,<port>` connects to (or listens on) a TCP address
//! - `tcp,<port>` is shorthand for localhost when connecting and for all
//!   interfaces when listening
//! - `stdio(self)` is the program's own console
//! - `stdio,<command...>` spawns a program and talks to its stdin/stdout
//! - `stdio(stderr-to-stdout),<command...>` also relays the program's stderr

use std::fmt;

use crate::error::ChannelError;

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket.
    Tcp {
        /// Host name or address; `None` when only a port was given.
        host: Option<String>,

        /// TCP port.
        port: u16,
    },

    /// The console this program runs on.
    Console,

    /// A spawned program.
    Program {
        /// Program and arguments.
        command: Vec<String>,

        /// Whether stderr is merged into the channel's input.
        stderr: bool,
    },
}

impl Endpoint {
    /// Parse a connection string.
    pub fn parse(target: &str) -> Result<Self, ChannelError> {
        let invalid = || ChannelError::InvalidTarget(target.to_string());
        let (kind, rest) = match target.trim().split_once(',') {
            Some((kind, rest)) => (kind.trim(), Some(rest.trim())),
            None => (target.trim(), None),
        };

        match (kind, rest) {
            ("tcp", Some(rest)) => {
                let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
                match parts.as_slice() {
                    [port] => Ok(Endpoint::Tcp {
                        host: None,
                        port: port.parse().map_err(|_| invalid())?,
                    }),
                    [host, port] if !host.is_empty() => Ok(Endpoint::Tcp {
                        host: Some(host.to_string()),
                        port: port.parse().map_err(|_| invalid())?,
                    }),
                    _ => Err(invalid()),
                }
            }
            ("stdio(self)", None) => Ok(Endpoint::Console),
            ("stdio", Some(command)) | ("stdio(stderr-to-stdout)", Some(command)) => {
                let command: Vec<String> =
                    command.split_whitespace().map(str::to_string).collect();
                if command.is_empty() {
                    return Err(invalid());
                }
                Ok(Endpoint::Program {
                    command,
                    stderr: kind == "stdio(stderr-to-stdout)",
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Get the socket address for a TCP connection.
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => Some(format!(
                "{}:{}",
                host.as_deref().unwrap_or("localhost"),
                port
            )),
            _ => None,
        }
    }

    /// Get the socket address to listen on.
    pub fn listen_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => Some(format!(
                "{}:{}",
                host.as_deref().unwrap_or("0.0.0.0"),
                port
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp {
                host: Some(host),
                port,
            } => write!(f, "tcp,{},{}", host, port),
            Endpoint::Tcp { host: None, port } => write!(f, "tcp,{}", port),
            Endpoint::Console => f.write_str("stdio(self)"),
            Endpoint::Program { command, stderr } => {
                let kind = if *stderr {
                    "stdio(stderr-to-stdout)"
                } else {
                    "stdio"
                };
                write!(f, "{},{}", kind, command.join(" "))
            }
        }
    }
}

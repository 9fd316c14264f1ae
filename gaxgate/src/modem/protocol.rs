//! Modem control protocol: command lines in, command lines out.
//!
//! The modem reports state changes as text lines terminated by `\r` or
//! `\n`. The first whitespace-separated token names the event, case
//! insensitively. Commands sent to the modem are space-joined tokens
//! terminated by `\r`.

use crate::error::ProtocolError;

/// Status lines the modem sends that need no reaction.
pub const ACKNOWLEDGEMENTS: &[&str] = &[
    "ok",
    "iamalive",
    "ptt",
    "buffer",
    "registered",
    "link",
    "pending",
    "cancelpending",
    "busy",
];

/// A parsed line from the modem control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// A radio link was established between `source` and `destination`.
    Connected {
        source: String,
        destination: String,
        /// Trailing arguments, such as the bandwidth.
        extra: Vec<String>,
    },

    /// The radio link went down.
    Disconnected,

    /// The modem rejected the last command.
    Wrong,

    /// One of [`ACKNOWLEDGEMENTS`].
    Ack(String),

    /// Anything else, lower-cased.
    Unknown(String),
}

impl ModemEvent {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().ok_or(ProtocolError::Empty)?.to_lowercase();
        let args: Vec<&str> = tokens.collect();

        match command.as_str() {
            "connected" => match args.as_slice() {
                [source, destination, extra @ ..] => Ok(ModemEvent::Connected {
                    source: source.to_string(),
                    destination: destination.to_string(),
                    extra: extra.iter().map(|s| s.to_string()).collect(),
                }),
                _ => Err(ProtocolError::MissingArguments {
                    command: "connected".to_string(),
                    expected: 2,
                    got: args.len(),
                }),
            },
            "disconnected" => Ok(ModemEvent::Disconnected),
            "wrong" => Ok(ModemEvent::Wrong),
            ack if ACKNOWLEDGEMENTS.contains(&ack) => Ok(ModemEvent::Ack(ack.to_string())),
            other => Ok(ModemEvent::Unknown(other.to_string())),
        }
    }

    /// The remote station of a `Connected` event as seen from `local`.
    pub fn peer(&self, local: &str) -> Option<&str> {
        match self {
            ModemEvent::Connected {
                source,
                destination,
                ..
            } => Some(if source == local {
                destination.as_str()
            } else {
                source.as_str()
            }),
            _ => None,
        }
    }
}

/// Encode a command line for the modem.
pub fn format_command(args: &[&str]) -> String {
    let mut line = args.join(" ");
    line.push('\r');
    line
}

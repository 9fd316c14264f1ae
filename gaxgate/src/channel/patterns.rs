//! Pattern matching utilities for login prompt detection.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// The two prompts of a Winlink RMS gateway login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPrompt {
    /// `Callsign :`
    Callsign,
    /// `Password :`
    Password,
}

impl LoginPrompt {
    /// Classify a complete line.
    ///
    /// A line is a prompt if, ignoring leading whitespace and case, it starts
    /// with `callsign` or `password`.
    pub fn from_line(line: &[u8]) -> Option<Self> {
        let line = line.trim_ascii_start();
        if starts_with_ignore_case(line, b"callsign") {
            Some(LoginPrompt::Callsign)
        } else if starts_with_ignore_case(line, b"password") {
            Some(LoginPrompt::Password)
        } else {
            None
        }
    }

    /// Classify an unterminated remnant.
    ///
    /// Gateways do not always terminate the prompt line, so a remnant that
    /// ends in a colon after the keyword is treated as a complete prompt.
    pub fn from_partial(data: &[u8]) -> Option<Self> {
        if !PARTIAL_PROMPT.is_match(data) {
            return None;
        }
        Self::from_line(data)
    }
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

static PARTIAL_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:callsign|password)\b[^\r\n]*:\s*$")
        .expect("partial prompt pattern is valid")
});

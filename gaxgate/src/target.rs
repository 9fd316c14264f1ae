//! Connection target templates.
//!
//! Downstream targets are connection strings with placeholders filled in per
//! session: positional `%0`, `%1`, ... from collected credentials, or
//! ax25d-style peer placeholders from the inbound channel's address.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::channel::base_callsign;

/// Prefix on a gateway target that selects the RMS login filter.
pub const LOGIN_PREFIX: &str = "rms,";

/// Value substituted for `%d`.
const DAEMON_NAME: &str = "gaxgate";

/// A gateway target with the optional login prefix removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    /// Connection string of the gateway.
    pub target: String,

    /// Whether the gateway expects a Winlink RMS login.
    pub login: bool,
}

impl GatewayTarget {
    /// Split the `rms,` prefix off a gateway target.
    pub fn parse(target: &str) -> Self {
        match target.strip_prefix(LOGIN_PREFIX) {
            Some(rest) => Self {
                target: rest.to_string(),
                login: true,
            },
            None => Self {
                target: target.to_string(),
                login: false,
            },
        }
    }
}

static POSITIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%(\d+)").expect("valid placeholder pattern"));

static PEER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([dUuSsPpRr%])").expect("valid placeholder pattern"));

/// Replace `%0`, `%1`, ... with `values` in order.
///
/// Placeholders without a corresponding value are left as they are.
pub fn substitute_positional(template: &str, values: &[String]) -> String {
    POSITIONAL
        .replace_all(template, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| values.get(index))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Replace ax25d-style placeholders using the remote station's address.
///
/// - `%d` the daemon name
/// - `%U` / `%u` remote callsign without SSID, upper / lower case
/// - `%S` / `%s` remote address with SSID, upper / lower case
/// - `%P %p %R %r %%` a literal `%`
pub fn substitute_peer(template: &str, remote_address: &str) -> String {
    let callsign = base_callsign(remote_address);
    PEER
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "d" => DAEMON_NAME.to_string(),
            "U" => callsign.to_uppercase(),
            "u" => callsign.to_lowercase(),
            "S" => remote_address.to_uppercase(),
            "s" => remote_address.to_lowercase(),
            _ => "%".to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_prefix() {
        let gateway = GatewayTarget::parse("rms,tcp,cms.winlink.org,8772");
        assert!(gateway.login);
        assert_eq!(gateway.target, "tcp,cms.winlink.org,8772");

        let gateway = GatewayTarget::parse("tcp,telehack.com,23");
        assert!(!gateway.login);
        assert_eq!(gateway.target, "tcp,telehack.com,23");
    }

    #[test]
    fn test_positional_substitution() {
        let creds = vec!["W1AW-10".to_string(), "secret".to_string()];
        assert_eq!(
            substitute_positional("ax25(addr=\"0,%0,N0CALL\"),pw=%1", &creds),
            "ax25(addr=\"0,W1AW-10,N0CALL\"),pw=secret"
        );

        // %10 is its own placeholder, not %1 followed by 0
        assert_eq!(substitute_positional("%10,%1", &creds), "%10,secret");
        assert_eq!(substitute_positional("no placeholders", &creds), "no placeholders");
    }

    #[test]
    fn test_peer_substitution() {
        assert_eq!(
            substitute_peer("stdio,/usr/bin/motd %U %u %S %s %d 100%%", "kf7hvm-10"),
            "stdio,/usr/bin/motd KF7HVM kf7hvm KF7HVM-10 kf7hvm-10 gaxgate 100%"
        );
    }
}

//! Client identity and per-connection ESMTP session state.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::response::Response;

/// Default client id used when no hostname can be determined.
///
/// Passes Postfix's `smtpd_helo_restrictions = reject_non_fqdn_helo_hostname`
/// check, but not `reject_unknown_helo_hostname`.
const DEFAULT_DOMAIN_CLIENT_ID: &str = "localhost.localdomain";

/// Client identifier, the parameter to `EHLO`/`HELO`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum ClientId {
    /// A fully-qualified domain name.
    Domain(String),
    /// An IPv4 address.
    Ipv4(Ipv4Addr),
    /// An IPv6 address.
    Ipv6(Ipv6Addr),
}

impl Default for ClientId {
    fn default() -> Self {
        Self::Ipv4(Ipv4Addr::new(127, 0, 0, 1))
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            ClientId::Domain(ref value) => f.write_str(value),
            ClientId::Ipv4(ref value) => write!(f, "[{}]", value),
            ClientId::Ipv6(ref value) => write!(f, "[IPv6:{}]", value),
        }
    }
}

impl ClientId {
    /// Creates a new `ClientId` from a fully qualified domain name.
    pub fn new(domain: String) -> ClientId {
        ClientId::Domain(domain)
    }

    /// Uses the current hostname, falling back to `localhost.localdomain`.
    pub fn hostname() -> ClientId {
        ClientId::Domain(
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .unwrap_or_else(|| DEFAULT_DOMAIN_CLIENT_ID.to_string()),
        )
    }
}

/// Per-connection ESMTP session state, reset on connect and on a successful STARTTLS.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Whether an EHLO/HELO exchange has completed.
    pub ehlo_done: bool,
    /// `true` unless the server forced a HELO fallback.
    pub esmtp: bool,
    /// Uppercased extension keyword to the remainder of its EHLO line.
    pub extensions: HashMap<String, String>,
    /// AUTH mechanisms advertised by the server, in server-advertised order.
    pub auth_mechanisms: Vec<String>,
    /// `SIZE`'s argument, if advertised.
    pub max_size: Option<u64>,
    /// Whether the underlying transport is currently TLS-encrypted.
    pub encrypted: bool,
    /// Text of the greeting line from the 220 response, if connected.
    pub hostname_greeting: Option<String>,
}

impl SessionState {
    /// Returns whether `keyword` (case-insensitive) was advertised by EHLO.
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Returns whether `mechanism` is in the server's advertised AUTH list.
    pub fn supports_auth_mechanism(&self, mechanism: &str) -> bool {
        self.auth_mechanisms
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    /// Clears all negotiated state. Called before every EHLO and after a
    /// successful STARTTLS, since the server must re-advertise extensions.
    fn reset_negotiated(&mut self) {
        self.ehlo_done = false;
        self.esmtp = false;
        self.extensions.clear();
        self.auth_mechanisms.clear();
        self.max_size = None;
    }

    /// Clears the whole session, including `encrypted`. Called on disconnect.
    pub fn reset(&mut self) {
        self.reset_negotiated();
        self.encrypted = false;
        self.hostname_greeting = None;
    }

    /// Called after a successful STARTTLS: per RFC 3207 the server must
    /// re-advertise its extensions, so all negotiated state is discarded.
    pub fn mark_encrypted(&mut self) {
        self.reset_negotiated();
        self.encrypted = true;
    }

    /// Populates extension state from a successful EHLO reply.
    ///
    /// The first line is the greeting and is discarded; each following line
    /// is split on its first whitespace into `(keyword, rest)`.
    pub fn apply_ehlo_response(&mut self, response: &Response) {
        self.reset_negotiated();
        self.ehlo_done = true;
        self.esmtp = true;

        for line in response.message.iter().skip(1) {
            if line.is_empty() {
                continue;
            }
            let (keyword, rest) = match line.split_once(char::is_whitespace) {
                Some((k, r)) => (k, r.trim_start()),
                None => (line.as_str(), ""),
            };
            let keyword = keyword.to_ascii_uppercase();

            if keyword == "SIZE" {
                self.max_size = rest.trim().parse().ok();
            }
            if keyword == "AUTH" {
                self.auth_mechanisms = rest
                    .split_whitespace()
                    .map(|m| m.to_ascii_uppercase())
                    .collect();
            }

            self.extensions.insert(keyword, rest.to_string());
        }
    }

    /// Populates state from a successful HELO fallback reply: no extensions,
    /// `esmtp = false`.
    pub fn apply_helo_response(&mut self) {
        self.reset_negotiated();
        self.ehlo_done = true;
        self.esmtp = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::{Category, Code, Detail, Response, Severity};

    fn ehlo_reply(lines: &[&str]) -> Response {
        Response::new(
            Code::new(
                Severity::PositiveCompletion,
                Category::Unspecified4,
                Detail::Zero,
            ),
            lines.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_clientid_display() {
        assert_eq!(format!("{}", ClientId::new("host".to_string())), "host");
        assert_eq!(
            format!("{}", ClientId::Ipv4(Ipv4Addr::new(127, 0, 0, 1))),
            "[127.0.0.1]"
        );
    }

    #[test]
    fn test_apply_ehlo_response_populates_extensions() {
        let mut state = SessionState::default();
        state.apply_ehlo_response(&ehlo_reply(&[
            "mail.example.org",
            "PIPELINING",
            "SIZE 1000000",
            "AUTH PLAIN LOGIN CRAM-MD5",
            "8BITMIME",
        ]));

        assert!(state.ehlo_done);
        assert!(state.esmtp);
        assert!(state.supports("PIPELINING"));
        assert!(state.supports("8bitmime"));
        assert_eq!(state.max_size, Some(1_000_000));
        assert!(state.supports_auth_mechanism("plain"));
        assert!(state.supports_auth_mechanism("CRAM-MD5"));
        assert!(!state.supports_auth_mechanism("XOAUTH2"));
    }

    #[test]
    fn test_ehlo_clears_previous_state() {
        let mut state = SessionState::default();
        state.apply_ehlo_response(&ehlo_reply(&["a", "PIPELINING"]));
        assert!(state.supports("PIPELINING"));

        state.apply_ehlo_response(&ehlo_reply(&["a", "STARTTLS"]));
        assert!(!state.supports("PIPELINING"));
        assert!(state.supports("STARTTLS"));
    }

    #[test]
    fn test_helo_fallback_has_no_extensions() {
        let mut state = SessionState::default();
        state.apply_ehlo_response(&ehlo_reply(&["a", "PIPELINING"]));
        state.apply_helo_response();
        assert!(state.ehlo_done);
        assert!(!state.esmtp);
        assert!(state.extensions.is_empty());
        assert!(state.auth_mechanisms.is_empty());
    }

    #[test]
    fn test_mark_encrypted_clears_state_but_not_encrypted_flag() {
        let mut state = SessionState::default();
        state.apply_ehlo_response(&ehlo_reply(&["a", "STARTTLS"]));
        state.mark_encrypted();
        assert!(state.extensions.is_empty());
        assert!(state.encrypted);
        assert!(!state.ehlo_done);
    }
}

//! SASL mechanisms for the `AUTH` command.

use hmac::{Hmac, Mac};
use md5::Md5;
use std::fmt::{self, Display, Formatter};

use crate::error::Error;

type HmacMd5 = Hmac<Md5>;

/// Username/password pair used to compute an AUTH response.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Credentials {
    authcid: String,
    password: String,
}

impl Credentials {
    /// Creates new credentials.
    pub fn new(authcid: String, password: String) -> Credentials {
        Credentials { authcid, password }
    }
}

/// A supported SASL mechanism.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Mechanism {
    /// `PLAIN`, [RFC 4616](https://tools.ietf.org/html/rfc4616): username and
    /// password sent in the clear (inside the TLS channel).
    Plain,
    /// `LOGIN`: username and password as two separate base64 challenge/responses.
    Login,
    /// `CRAM-MD5`, [RFC 2195](https://tools.ietf.org/html/rfc2195): HMAC-MD5
    /// challenge response, the password itself is never sent on the wire.
    CramMd5,
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
        })
    }
}

impl Mechanism {
    /// `true` if this mechanism can send its first response alongside the
    /// initial `AUTH` command instead of waiting for a server challenge.
    pub fn supports_initial_response(self) -> bool {
        matches!(self, Mechanism::Plain)
    }

    /// Computes the (unencoded) response for one round of the exchange.
    ///
    /// `challenge` is `None` for the initial response of a mechanism that
    /// supports it, and `Some` for every following round.
    pub fn response(
        self,
        credentials: &Credentials,
        challenge: Option<&str>,
    ) -> Result<String, Error> {
        match self {
            Mechanism::Plain => match challenge {
                Some(_) => Err(Error::AuthenticationError(
                    "PLAIN does not accept a server challenge".to_string(),
                )),
                None => Ok(format!(
                    "\u{0}{}\u{0}{}",
                    credentials.authcid, credentials.password
                )),
            },
            Mechanism::Login => match challenge {
                Some(chal) if chal.eq_ignore_ascii_case("username:") => {
                    Ok(credentials.authcid.clone())
                }
                Some(chal) if chal.eq_ignore_ascii_case("password:") => {
                    Ok(credentials.password.clone())
                }
                Some(chal) => Err(Error::AuthenticationError(format!(
                    "unexpected LOGIN challenge: {}",
                    chal
                ))),
                None => Err(Error::AuthenticationError(
                    "LOGIN requires a server challenge".to_string(),
                )),
            },
            Mechanism::CramMd5 => match challenge {
                Some(chal) => {
                    let mut mac = HmacMd5::new_from_slice(credentials.password.as_bytes())
                        .map_err(|e| Error::AuthenticationError(e.to_string()))?;
                    mac.update(chal.as_bytes());
                    let digest = mac.finalize().into_bytes();
                    let hex = digest.iter().fold(String::new(), |mut acc, byte| {
                        acc.push_str(&format!("{:02x}", byte));
                        acc
                    });
                    Ok(format!("{} {}", credentials.authcid, hex))
                }
                None => Err(Error::AuthenticationError(
                    "CRAM-MD5 requires a server challenge".to_string(),
                )),
            },
        }
    }
}

/// Picks the first mechanism in the server's advertised order that the
/// client also supports.
///
/// `server_mechanisms` preserves the order the server listed them in
/// (`SessionState.auth_mechanisms` is a `Vec`, not a set, specifically for
/// this), and that order is authoritative for selection.
pub fn negotiate(server_mechanisms: &[String]) -> Option<Mechanism> {
    server_mechanisms
        .iter()
        .find_map(|s| {
            [Mechanism::CramMd5, Mechanism::Login, Mechanism::Plain]
                .into_iter()
                .find(|m| s.eq_ignore_ascii_case(&m.to_string()))
        })
        .copied()
}

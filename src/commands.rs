//! Wire representation of the SMTP commands the client issues.

use std::convert::AsRef;
use std::fmt::{self, Display, Formatter};

use log::debug;

use crate::auth::{Credentials, Mechanism};
use crate::error::Error;
use crate::response::Response;
use crate::session::ClientId;
use crate::types::EmailAddress;

/// `MAIL FROM` parameter.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum MailParameter {
    /// `SIZE=n`: declared message size, [RFC 1870](https://tools.ietf.org/html/rfc1870).
    Size(u64),
    /// `BODY=...`: body encoding, [RFC 6152](https://tools.ietf.org/html/rfc6152).
    Body(MailBodyParameter),
    /// Any other keyword/value parameter, passed through verbatim.
    Other {
        /// Parameter keyword.
        keyword: String,
        /// Parameter value, if any.
        value: Option<String>,
    },
}

impl Display for MailParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            MailParameter::Size(size) => write!(f, "SIZE={}", size),
            MailParameter::Body(ref value) => write!(f, "BODY={}", value),
            MailParameter::Other {
                ref keyword,
                ref value,
            } => match value {
                Some(value) => write!(f, "{}={}", keyword, value),
                None => f.write_str(keyword),
            },
        }
    }
}

/// `BODY` value of a `MAIL FROM` command.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum MailBodyParameter {
    /// `7BIT`, the default.
    SevenBit,
    /// `8BITMIME`, [RFC 6152](https://tools.ietf.org/html/rfc6152).
    EightBitMime,
}

impl Display for MailBodyParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            MailBodyParameter::SevenBit => "7BIT",
            MailBodyParameter::EightBitMime => "8BITMIME",
        })
    }
}

/// `RCPT TO` parameter.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum RcptParameter {
    /// Any keyword/value parameter, e.g. `NOTIFY=SUCCESS,FAILURE` or `ORCPT=...`.
    Other {
        /// Parameter keyword.
        keyword: String,
        /// Parameter value, if any.
        value: Option<String>,
    },
}

impl Display for RcptParameter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RcptParameter::Other {
                ref keyword,
                ref value,
            } => match value {
                Some(value) => write!(f, "{}={}", keyword, value),
                None => f.write_str(keyword),
            },
        }
    }
}

/// `EHLO` command.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EhloCommand {
    client_id: ClientId,
}

impl Display for EhloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "EHLO {}\r\n", self.client_id)
    }
}

impl EhloCommand {
    /// Creates an EHLO command.
    pub fn new(client_id: ClientId) -> EhloCommand {
        EhloCommand { client_id }
    }
}

/// `HELO` command, the fallback issued when a server rejects `EHLO`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HeloCommand {
    client_id: ClientId,
}

impl Display for HeloCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "HELO {}\r\n", self.client_id)
    }
}

impl HeloCommand {
    /// Creates a HELO command.
    pub fn new(client_id: ClientId) -> HeloCommand {
        HeloCommand { client_id }
    }
}

/// `STARTTLS` command.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct StarttlsCommand;

impl Display for StarttlsCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("STARTTLS\r\n")
    }
}

/// `MAIL FROM` command.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MailCommand {
    sender: Option<EmailAddress>,
    parameters: Vec<MailParameter>,
}

impl Display for MailCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "MAIL FROM:<{}>",
            self.sender.as_ref().map(AsRef::as_ref).unwrap_or("")
        )?;
        for parameter in &self.parameters {
            write!(f, " {}", parameter)?;
        }
        f.write_str("\r\n")
    }
}

impl MailCommand {
    /// Creates a MAIL command.
    pub fn new(sender: Option<EmailAddress>, parameters: Vec<MailParameter>) -> MailCommand {
        MailCommand { sender, parameters }
    }
}

/// `RCPT TO` command.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RcptCommand {
    recipient: EmailAddress,
    parameters: Vec<RcptParameter>,
}

impl Display for RcptCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "RCPT TO:<{}>", self.recipient)?;
        for parameter in &self.parameters {
            write!(f, " {}", parameter)?;
        }
        f.write_str("\r\n")
    }
}

impl RcptCommand {
    /// Creates an RCPT command.
    pub fn new(recipient: EmailAddress, parameters: Vec<RcptParameter>) -> RcptCommand {
        RcptCommand {
            recipient,
            parameters,
        }
    }
}

/// `DATA` command.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct DataCommand;

impl Display for DataCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("DATA\r\n")
    }
}

/// `QUIT` command.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct QuitCommand;

impl Display for QuitCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("QUIT\r\n")
    }
}

/// `VRFY` command: asks the server to confirm a mailbox exists.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct VrfyCommand {
    argument: String,
}

impl Display for VrfyCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "VRFY {}\r\n", self.argument)
    }
}

impl VrfyCommand {
    /// Creates a VRFY command for the given mailbox or name.
    pub fn new(argument: impl Into<String>) -> VrfyCommand {
        VrfyCommand {
            argument: argument.into(),
        }
    }
}

/// `EXPN` command: asks the server to expand a mailing list.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ExpnCommand {
    argument: String,
}

impl Display for ExpnCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "EXPN {}\r\n", self.argument)
    }
}

impl ExpnCommand {
    /// Creates an EXPN command for the given list name.
    pub fn new(argument: impl Into<String>) -> ExpnCommand {
        ExpnCommand {
            argument: argument.into(),
        }
    }
}

/// `HELP` command: asks the server for information about a command, or a
/// general summary when no argument is given.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HelpCommand {
    argument: Option<String>,
}

impl Display for HelpCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.argument {
            Some(argument) => write!(f, "HELP {}\r\n", argument),
            None => f.write_str("HELP\r\n"),
        }
    }
}

impl HelpCommand {
    /// Creates a HELP command, optionally about a specific topic.
    pub fn new(argument: Option<String>) -> HelpCommand {
        HelpCommand { argument }
    }
}

/// `NOOP` command.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct NoopCommand;

impl Display for NoopCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("NOOP\r\n")
    }
}

/// `RSET` command.
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub struct RsetCommand;

impl Display for RsetCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("RSET\r\n")
    }
}

/// `AUTH` command, one round of a SASL exchange.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct AuthCommand {
    mechanism: Mechanism,
    response: Option<String>,
}

impl Display for AuthCommand {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let encoded_response = self
            .response
            .as_ref()
            .map(|r| base64::encode_config(r.as_bytes(), base64::STANDARD));

        if self.mechanism.supports_initial_response() {
            write!(
                f,
                "AUTH {} {}",
                self.mechanism,
                encoded_response.unwrap_or_default()
            )?;
        } else {
            match encoded_response {
                Some(response) => f.write_str(&response)?,
                None => write!(f, "AUTH {}", self.mechanism)?,
            }
        }
        f.write_str("\r\n")
    }
}

impl AuthCommand {
    /// Creates the initial `AUTH mechanism` command.
    pub fn new(mechanism: Mechanism, credentials: &Credentials) -> Result<AuthCommand, Error> {
        let response = if mechanism.supports_initial_response() {
            Some(mechanism.response(credentials, None)?)
        } else {
            None
        };
        Ok(AuthCommand {
            mechanism,
            response,
        })
    }

    /// Creates the next round's response line out of a `334` challenge reply.
    pub fn new_from_response(
        mechanism: Mechanism,
        credentials: &Credentials,
        response: &Response,
    ) -> Result<AuthCommand, Error> {
        if !response.has_code(334) {
            return Err(Error::AuthenticationError(
                "expected a 334 continuation challenge".to_string(),
            ));
        }

        let encoded_challenge = response.first_word().ok_or_else(|| {
            Error::AuthenticationError("empty auth challenge".to_string())
        })?;
        debug!("auth encoded challenge: {}", encoded_challenge);

        let decoded_challenge = String::from_utf8(base64::decode(encoded_challenge)?)?;
        let response = Some(mechanism.response(credentials, Some(decoded_challenge.as_ref()))?);

        Ok(AuthCommand {
            mechanism,
            response,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let id = ClientId::Domain("localhost".to_string());
        let id_ipv4 = ClientId::Ipv4(std::net::Ipv4Addr::new(127, 0, 0, 1));
        let email = EmailAddress::new("test@example.com".to_string()).unwrap();
        let mail_parameter = MailParameter::Other {
            keyword: "TEST".to_string(),
            value: Some("value".to_string()),
        };
        let rcpt_parameter = RcptParameter::Other {
            keyword: "TEST".to_string(),
            value: Some("value".to_string()),
        };
        assert_eq!(format!("{}", EhloCommand::new(id.clone())), "EHLO localhost\r\n");
        assert_eq!(format!("{}", HeloCommand::new(id)), "HELO localhost\r\n");
        assert_eq!(
            format!("{}", EhloCommand::new(id_ipv4)),
            "EHLO [127.0.0.1]\r\n"
        );
        assert_eq!(
            format!("{}", MailCommand::new(Some(email.clone()), vec![])),
            "MAIL FROM:<test@example.com>\r\n"
        );
        assert_eq!(
            format!("{}", MailCommand::new(None, vec![])),
            "MAIL FROM:<>\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                MailCommand::new(Some(email.clone()), vec![MailParameter::Size(42)])
            ),
            "MAIL FROM:<test@example.com> SIZE=42\r\n"
        );
        assert_eq!(
            format!(
                "{}",
                MailCommand::new(
                    Some(email.clone()),
                    vec![
                        MailParameter::Size(42),
                        MailParameter::Body(MailBodyParameter::EightBitMime),
                        mail_parameter,
                    ],
                )
            ),
            "MAIL FROM:<test@example.com> SIZE=42 BODY=8BITMIME TEST=value\r\n"
        );
        assert_eq!(
            format!("{}", RcptCommand::new(email.clone(), vec![])),
            "RCPT TO:<test@example.com>\r\n"
        );
        assert_eq!(
            format!("{}", RcptCommand::new(email, vec![rcpt_parameter])),
            "RCPT TO:<test@example.com> TEST=value\r\n"
        );
        assert_eq!(format!("{}", VrfyCommand::new("postmaster")), "VRFY postmaster\r\n");
        assert_eq!(format!("{}", ExpnCommand::new("staff")), "EXPN staff\r\n");
        assert_eq!(format!("{}", HelpCommand::new(None)), "HELP\r\n");
        assert_eq!(
            format!("{}", HelpCommand::new(Some("MAIL".to_string()))),
            "HELP MAIL\r\n"
        );
        assert_eq!(format!("{}", QuitCommand), "QUIT\r\n");
        assert_eq!(format!("{}", DataCommand), "DATA\r\n");
        assert_eq!(format!("{}", NoopCommand), "NOOP\r\n");
        assert_eq!(format!("{}", RsetCommand), "RSET\r\n");

        let credentials = Credentials::new("user".to_string(), "password".to_string());
        assert_eq!(
            format!("{}", AuthCommand::new(Mechanism::Plain, &credentials).unwrap()),
            "AUTH PLAIN AHVzZXIAcGFzc3dvcmQ=\r\n"
        );
        assert_eq!(
            format!("{}", AuthCommand::new(Mechanism::Login, &credentials).unwrap()),
            "AUTH LOGIN\r\n"
        );
    }
}

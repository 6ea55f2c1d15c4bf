//! Addresses, envelopes and the outcome of a send operation.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::Error;
use crate::response::Response;

/// A validated email address.
///
/// Validation is limited to rejecting characters that could inject extra
/// SMTP command lines; real mailbox validation is the server's job.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Creates a new address, rejecting control characters, whitespace and `<`/`>`.
    pub fn new(address: String) -> Result<EmailAddress, Error> {
        if address.chars().any(|c| {
            !c.is_ascii() || c.is_ascii_control() || c.is_ascii_whitespace() || c == '<' || c == '>'
        }) {
            return Err(Error::IllegalArgument("invalid email address"));
        }
        Ok(EmailAddress(address))
    }
}

impl FromStr for EmailAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailAddress::new(s.to_string())
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Envelope for a single message: the `MAIL FROM`/`RCPT TO` addresses plus
/// their ESMTP parameters.
///
/// Only mailboxes are accepted; source routes are not supported, per RFC 5321.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SendEnvelope {
    /// Recipient addresses. Must not be empty.
    forward_path: Vec<EmailAddress>,
    /// Sender address. `None` for the null reverse-path (`MAIL FROM:<>`, bounces).
    reverse_path: Option<EmailAddress>,
    /// Extra `MAIL FROM` parameters, e.g. `SIZE`, `BODY=8BITMIME`, `RET`, `ENVID`.
    pub mail_options: Vec<String>,
    /// Extra `RCPT TO` parameters, e.g. `NOTIFY`, `ORCPT`.
    pub rcpt_options: Vec<String>,
}

impl SendEnvelope {
    /// Creates a new envelope. Fails if `to` is empty.
    pub fn new(from: Option<EmailAddress>, to: Vec<EmailAddress>) -> Result<SendEnvelope, Error> {
        if to.is_empty() {
            return Err(Error::IllegalArgument("missing destination address"));
        }
        Ok(SendEnvelope {
            forward_path: to,
            reverse_path: from,
            mail_options: Vec::new(),
            rcpt_options: Vec::new(),
        })
    }

    /// Recipient addresses.
    pub fn to(&self) -> &[EmailAddress] {
        self.forward_path.as_slice()
    }

    /// Sender address, if any.
    pub fn from(&self) -> Option<&EmailAddress> {
        self.reverse_path.as_ref()
    }
}

/// A structured message that knows its own envelope and wire bytes.
///
/// Lets [`crate::api::send`] accept a caller's own message type (e.g. a
/// MIME builder) without this crate depending on any particular message or
/// MIME-parsing library: implement this trait and hand the value over.
pub trait Message {
    /// Sender address for the envelope's `MAIL FROM`. `None` for the null
    /// reverse-path.
    fn sender(&self) -> Option<EmailAddress>;
    /// Recipient addresses for the envelope's `RCPT TO`. Must not be empty.
    fn recipients(&self) -> Vec<EmailAddress>;
    /// The fully serialized message, CRLF-terminated, ready for dot-stuffing.
    fn serialize(&self) -> Vec<u8>;
}

/// A message ready to be transmitted: an envelope plus its already-serialized body.
///
/// The body is the raw message as it should appear on the wire before
/// dot-stuffing (i.e. CRLF-terminated lines, no transparency applied yet).
#[derive(Clone, Debug)]
pub struct SendableEmail {
    envelope: SendEnvelope,
    body: Vec<u8>,
}

impl SendableEmail {
    /// Creates a new email out of an envelope and a message body.
    pub fn new(envelope: SendEnvelope, body: impl Into<Vec<u8>>) -> SendableEmail {
        SendableEmail {
            envelope,
            body: body.into(),
        }
    }

    /// The envelope.
    pub fn envelope(&self) -> &SendEnvelope {
        &self.envelope
    }

    /// The raw message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Outcome of a [`crate::client::Client::send`] call.
///
/// A send can partially succeed: some recipients accepted, others rejected
/// by RCPT TO, as long as at least one recipient survives to the DATA stage.
#[derive(Clone, Debug)]
pub struct SendResult {
    /// Recipients the server rejected at `RCPT TO`, with the rejection reply.
    pub rejected: HashMap<EmailAddress, Response>,
    /// The server's reply to the final `.` of the DATA command.
    pub final_response: Response,
}

impl SendResult {
    /// `true` if every requested recipient was rejected by RCPT TO.
    pub fn all_rejected(&self, requested: &[EmailAddress]) -> bool {
        requested.iter().all(|a| self.rejected.contains_key(a))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_email_address() {
        assert!(EmailAddress::new("foobar@example.org".to_string()).is_ok());
        assert!(EmailAddress::new("foobar@localhost".to_string()).is_ok());
        assert!(EmailAddress::new("foo\rbar@localhost".to_string()).is_err());
        assert!(EmailAddress::new(">foobar@example.org".to_string()).is_err());
        assert!(EmailAddress::new("foo bar@example.org".to_string()).is_err());
        assert!(EmailAddress::new("foobar@exa\r\nmple.org".to_string()).is_err());
    }

    #[test]
    fn test_email_address_usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(
            EmailAddress::new("a@example.org".to_string()).unwrap(),
            1,
        );
        assert_eq!(
            map.get(&EmailAddress::new("a@example.org".to_string()).unwrap()),
            Some(&1)
        );
    }

    #[test]
    fn test_envelope_requires_recipient() {
        assert!(SendEnvelope::new(None, vec![]).is_err());
        let to = EmailAddress::new("a@example.org".to_string()).unwrap();
        assert!(SendEnvelope::new(None, vec![to]).is_ok());
    }

    struct FixedMessage;

    impl Message for FixedMessage {
        fn sender(&self) -> Option<EmailAddress> {
            Some(EmailAddress::new("from@example.org".to_string()).unwrap())
        }

        fn recipients(&self) -> Vec<EmailAddress> {
            vec![EmailAddress::new("to@example.org".to_string()).unwrap()]
        }

        fn serialize(&self) -> Vec<u8> {
            b"Subject: hi\r\n\r\nbody\r\n".to_vec()
        }
    }

    #[test]
    fn test_message_trait_object_is_usable() {
        let message: &dyn Message = &FixedMessage;
        assert_eq!(message.recipients().len(), 1);
        assert!(!message.serialize().is_empty());
    }
}

//! One-shot convenience function for sending a single message without
//! managing a [`Client`](crate::client::Client) by hand.

use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::{Credentials, Mechanism};
use crate::client::Client;
use crate::config::{ConnectionConfigBuilder, Security};
use crate::error::Error;
use crate::session::ClientId;
use crate::types::{EmailAddress, Message, SendEnvelope, SendResult, SendableEmail};

/// Everything [`send_message`] needs beyond the message itself.
///
/// Mirrors the keyword arguments of a typical `send` helper: a hostname/port
/// to dial, optional credentials, and the security mode to use.
#[derive(Clone, Debug)]
pub struct SendOptions {
    /// Hostname or IP literal to resolve and connect to.
    pub hostname: String,
    /// Port to connect to.
    pub port: u16,
    /// How the connection should be secured. Defaults to `StartTls`.
    pub security: Security,
    /// Client id to present in `EHLO`/`HELO`. Defaults to the local hostname.
    pub client_id: Option<ClientId>,
    /// Credentials to authenticate with, if any.
    pub credentials: Option<Credentials>,
    /// Forces a specific AUTH mechanism instead of negotiating the server's
    /// preferred one.
    pub auth_mechanism: Option<Mechanism>,
    /// Per-command timeout.
    pub timeout: Option<Duration>,
    /// Skip certificate validation. Dangerous; for testing only.
    pub danger_accept_invalid_certs: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            hostname: "localhost".to_string(),
            port: 587,
            security: Security::StartTls,
            client_id: None,
            credentials: None,
            auth_mechanism: None,
            timeout: Some(Duration::from_secs(60)),
            danger_accept_invalid_certs: false,
        }
    }
}

/// Connects, authenticates if credentials are given, sends one message, and
/// disconnects. `sender` and `recipients` must be non-empty.
///
/// This is the raw-bytes path: the caller supplies an already-serialized
/// body and its own envelope addresses. For a structured message that knows
/// its own sender/recipients/bytes, use [`send`] instead.
pub async fn send_message(
    sender: EmailAddress,
    recipients: Vec<EmailAddress>,
    body: impl Into<Vec<u8>>,
    options: &SendOptions,
) -> Result<SendResult, Error> {
    if recipients.is_empty() {
        return Err(Error::IllegalArgument("missing destination address"));
    }
    let envelope = SendEnvelope::new(Some(sender), recipients)?;
    let email = SendableEmail::new(envelope, body);
    send_prepared(&email, options).await
}

/// Connects, authenticates if credentials are given, sends a structured
/// [`Message`], and disconnects.
///
/// This is the structured-message path: `message` supplies its own sender,
/// recipients and serialized bytes, so no email-parsing library is required
/// here — only this small trait.
pub async fn send(message: &dyn Message, options: &SendOptions) -> Result<SendResult, Error> {
    let recipients = message.recipients();
    if recipients.is_empty() {
        return Err(Error::IllegalArgument("missing destination address"));
    }
    let envelope = SendEnvelope::new(message.sender(), recipients)?;
    let email = SendableEmail::new(envelope, message.serialize());
    send_prepared(&email, options).await
}

async fn send_prepared(email: &SendableEmail, options: &SendOptions) -> Result<SendResult, Error> {
    let addr = resolve(&options.hostname, options.port).await?;
    let mut builder = ConnectionConfigBuilder::new(addr)
        .server_hostname(options.hostname.clone())
        .security(options.security.clone())
        .timeout(options.timeout)
        .danger_accept_invalid_certs(options.danger_accept_invalid_certs);
    if let Some(ref client_id) = options.client_id {
        builder = builder.client_id(client_id.clone());
    }

    let client = Client::new(builder.build()?);
    client.connect().await?;

    if let Some(ref credentials) = options.credentials {
        if let Err(err) = client.authenticate(credentials.clone(), options.auth_mechanism).await {
            client.close().await;
            return Err(err);
        }
    }

    let result = client.send(email).await;
    client.close().await;
    result
}

async fn resolve(hostname: &str, port: u16) -> Result<SocketAddr, Error> {
    tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|_| Error::ConnectError(format!("could not resolve {}", hostname)))?
        .next()
        .ok_or_else(|| Error::ConnectError(format!("no address found for {}", hostname)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_options_are_starttls_on_587() {
        let options = SendOptions::default();
        assert_eq!(options.port, 587);
        assert!(matches!(options.security, Security::StartTls));
    }

    struct EmptyMessage;

    impl Message for EmptyMessage {
        fn sender(&self) -> Option<EmailAddress> {
            None
        }

        fn recipients(&self) -> Vec<EmailAddress> {
            Vec::new()
        }

        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_send_rejects_message_with_no_recipients_before_any_io() {
        let err = send(&EmptyMessage, &SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }
}

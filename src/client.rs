//! The high-level client: connection lifecycle, command execution, and send orchestration.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;

use crate::auth::{self, Credentials, Mechanism};
use crate::commands::{
    AuthCommand, DataCommand, EhloCommand, ExpnCommand, HelpCommand, HeloCommand, MailCommand,
    NoopCommand, QuitCommand, RcptCommand, RcptParameter, RsetCommand, StarttlsCommand,
    VrfyCommand,
};
use crate::config::{ConnectionConfig, Security};
use crate::error::Error;
use crate::net::{ClientTlsParameters, NetworkStream};
use crate::response::Response;
use crate::session::SessionState;
use crate::stream::SmtpStream;
use crate::types::{SendEnvelope, SendResult, SendableEmail};

/// Connection lifecycle, per the state machine: a fatal error on any command
/// always sends the connection back to `Disconnected`.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Lifecycle {
    /// No transport open.
    Disconnected,
    /// Transport open, greeting received, no successful EHLO/HELO yet.
    Connected,
    /// EHLO/HELO has completed; commands may be issued.
    Ready,
}

struct Connection {
    stream: SmtpStream,
    session: SessionState,
    lifecycle: Lifecycle,
}

/// An async SMTP client for a single connection.
///
/// All commands on a given `Client` are serialized through an internal lock,
/// so it is safe to share a `Client` behind an `Arc` across tasks, though
/// commands from different tasks queue up rather than running concurrently.
#[allow(missing_debug_implementations)]
pub struct Client {
    config: ConnectionConfig,
    connection: Mutex<Option<Connection>>,
}

impl Client {
    /// Creates a client for the given configuration. Does not connect.
    pub fn new(config: ConnectionConfig) -> Client {
        Client {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Opens the transport, reads the greeting, and issues `EHLO` (falling
    /// back to `HELO` if the server rejects it).
    pub async fn connect(&self) -> Result<(), Error> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            return Err(Error::IllegalArgument("already connected"));
        }

        let timeout = self.config.timeout;
        let tls_parameters = ClientTlsParameters::new(
            self.config.server_hostname.clone(),
            self.config.tls_connector.clone(),
        );

        let initial_tls = match self.config.security {
            Security::Wrapped => Some(&tls_parameters),
            Security::None | Security::StartTls => None,
        };
        let network = NetworkStream::connect(self.config.addr, timeout, initial_tls).await?;
        let mut stream = SmtpStream::new(network);
        let mut session = SessionState::default();

        if self.config.expect_greeting {
            let greeting = with_timeout(timeout, stream.read_response()).await?;
            session.hostname_greeting = greeting.first_line().map(str::to_string);
        }
        session.encrypted = stream.is_encrypted();

        ehlo_or_helo(&mut stream, &mut session, &self.config.client_id, timeout).await?;

        if matches!(self.config.security, Security::StartTls) {
            if !session.supports("STARTTLS") {
                return Err(Error::NotSupported("server does not advertise STARTTLS"));
            }
            with_timeout(timeout, stream.command(StarttlsCommand)).await?;
            stream = with_timeout(timeout, stream.upgrade_tls(&tls_parameters)).await?;
            session.mark_encrypted();
            ehlo_or_helo(&mut stream, &mut session, &self.config.client_id, timeout).await?;
        }

        *guard = Some(Connection {
            stream,
            session,
            lifecycle: Lifecycle::Ready,
        });
        Ok(())
    }

    /// Authenticates using the first mechanism the server advertises that
    /// the client also supports, or a specific one if `mechanism` is given.
    pub async fn authenticate(
        &self,
        credentials: Credentials,
        mechanism: Option<Mechanism>,
    ) -> Result<(), Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;

        let mechanism = match mechanism {
            Some(m) => m,
            None => auth::negotiate(&connection.session.auth_mechanisms).ok_or(
                Error::AuthenticationError("no mutually supported AUTH mechanism".to_string()),
            )?,
        };

        let timeout = self.config.timeout;
        let result: Result<(), Error> = async {
            let mut response = with_timeout(
                timeout,
                connection
                    .stream
                    .command(AuthCommand::new(mechanism, &credentials)?),
            )
            .await?;

            let mut rounds = 0;
            while response.has_code(334) {
                rounds += 1;
                if rounds > 10 {
                    return Err(Error::AuthenticationError(
                        "too many authentication challenges".to_string(),
                    ));
                }
                response = with_timeout(
                    timeout,
                    connection.stream.command(AuthCommand::new_from_response(
                        mechanism,
                        &credentials,
                        &response,
                    )?),
                )
                .await?;
            }
            Ok(())
        }
        .await;

        if result.is_err() {
            connection.lifecycle = Lifecycle::Disconnected;
            *guard = None;
        }
        result
    }

    /// Sends one message: `MAIL FROM`, then `RCPT TO` for each recipient,
    /// then `DATA` with the body, pipelined when the server supports it.
    ///
    /// Succeeds as long as at least one recipient is accepted; rejected
    /// recipients are reported in [`SendResult::rejected`].
    pub async fn send(&self, email: &SendableEmail) -> Result<SendResult, Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;
        if connection.lifecycle != Lifecycle::Ready {
            return Err(Error::ServerDisconnected("session not ready".to_string()));
        }

        let timeout = self.config.timeout;
        let result = send_envelope(connection, email, timeout).await;
        if let Err(ref err) = result {
            if is_fatal(err) {
                connection.lifecycle = Lifecycle::Disconnected;
                *guard = None;
            }
        }
        result
    }

    /// Sends `QUIT` and closes the transport. Best-effort: errors writing
    /// `QUIT` are ignored since the connection is being torn down anyway.
    pub async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(mut connection) = guard.take() {
            let _ = tokio_timeout(
                self.config.timeout.unwrap_or(std::time::Duration::from_secs(5)),
                connection.stream.command(QuitCommand),
            )
            .await;
        }
    }

    /// Sends `NOOP`, for keepalive or connection-health checks.
    pub async fn noop(&self) -> Result<Response, Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;
        with_timeout(self.config.timeout, connection.stream.command(NoopCommand)).await
    }

    /// Sends `VRFY`, asking the server to confirm a mailbox exists.
    pub async fn vrfy(&self, argument: impl Into<String>) -> Result<Response, Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;
        with_timeout(
            self.config.timeout,
            connection.stream.command(VrfyCommand::new(argument)),
        )
        .await
    }

    /// Sends `EXPN`, asking the server to expand a mailing list.
    pub async fn expn(&self, argument: impl Into<String>) -> Result<Response, Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;
        with_timeout(
            self.config.timeout,
            connection.stream.command(ExpnCommand::new(argument)),
        )
        .await
    }

    /// Sends `HELP`, optionally about a specific topic.
    pub async fn help(&self, argument: Option<String>) -> Result<Response, Error> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(Error::ServerDisconnected(
            "not connected".to_string(),
        ))?;
        with_timeout(
            self.config.timeout,
            connection.stream.command(HelpCommand::new(argument)),
        )
        .await
    }
}

async fn ehlo_or_helo(
    stream: &mut SmtpStream,
    session: &mut SessionState,
    client_id: &crate::session::ClientId,
    timeout: Option<std::time::Duration>,
) -> Result<(), Error> {
    let ehlo_result = with_timeout(timeout, stream.command(EhloCommand::new(client_id.clone()))).await;
    match ehlo_result {
        Ok(response) => session.apply_ehlo_response(&response),
        Err(Error::ResponseError(_)) => {
            with_timeout(timeout, stream.command(HeloCommand::new(client_id.clone()))).await?;
            session.apply_helo_response();
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

fn is_fatal(err: &Error) -> bool {
    !matches!(
        err,
        Error::SenderRefused(_) | Error::RecipientsRefused(_) | Error::DataError(_)
    )
}

async fn send_envelope(
    connection: &mut Connection,
    email: &SendableEmail,
    timeout: Option<std::time::Duration>,
) -> Result<SendResult, Error> {
    let envelope = email.envelope();
    let body = email.body();

    if let Some(max_size) = connection.session.max_size {
        let size = body.len() as u64;
        if size > max_size {
            return Err(Error::MessageTooLarge { size, max_size });
        }
    }

    let pipelining = connection.session.supports("PIPELINING");
    let mail_parameters = build_mail_parameters(envelope, body.len() as u64);
    let rcpt_parameters = build_rcpt_parameters(envelope);

    if pipelining {
        send_pipelined(
            connection,
            envelope,
            body,
            &mail_parameters,
            &rcpt_parameters,
            timeout,
        )
        .await
    } else {
        send_sequential(
            connection,
            envelope,
            body,
            &mail_parameters,
            &rcpt_parameters,
            timeout,
        )
        .await
    }
}

fn build_mail_parameters(
    envelope: &SendEnvelope,
    _size: u64,
) -> Vec<crate::commands::MailParameter> {
    envelope
        .mail_options
        .iter()
        .map(|raw| match raw.split_once('=') {
            Some((keyword, value)) => crate::commands::MailParameter::Other {
                keyword: keyword.to_string(),
                value: Some(value.to_string()),
            },
            None => crate::commands::MailParameter::Other {
                keyword: raw.clone(),
                value: None,
            },
        })
        .collect()
}

fn build_rcpt_parameters(envelope: &SendEnvelope) -> Vec<RcptParameter> {
    envelope
        .rcpt_options
        .iter()
        .map(|raw| match raw.split_once('=') {
            Some((keyword, value)) => RcptParameter::Other {
                keyword: keyword.to_string(),
                value: Some(value.to_string()),
            },
            None => RcptParameter::Other {
                keyword: raw.clone(),
                value: None,
            },
        })
        .collect()
}

async fn send_sequential(
    connection: &mut Connection,
    envelope: &SendEnvelope,
    body: &[u8],
    mail_parameters: &[crate::commands::MailParameter],
    rcpt_parameters: &[RcptParameter],
    timeout: Option<std::time::Duration>,
) -> Result<SendResult, Error> {
    let mail_command = MailCommand::new(envelope.from().cloned(), mail_parameters.to_vec());
    let mail_response = with_timeout(timeout, connection.stream.command(mail_command)).await;
    if let Err(Error::ResponseError(response)) = mail_response {
        return Err(Error::SenderRefused(response));
    }
    mail_response?;

    let mut rejected = HashMap::new();
    let mut accepted = 0;
    for recipient in envelope.to() {
        let rcpt_command = RcptCommand::new(recipient.clone(), rcpt_parameters.to_vec());
        match with_timeout(timeout, connection.stream.command(rcpt_command)).await {
            Ok(_) => accepted += 1,
            Err(Error::ResponseError(response)) => {
                rejected.insert(recipient.clone(), response);
            }
            Err(err) => return Err(err),
        }
    }
    if accepted == 0 {
        with_timeout(timeout, connection.stream.command(RsetCommand)).await?;
        return Err(Error::RecipientsRefused(rejected));
    }

    with_timeout(timeout, connection.stream.command(DataCommand)).await?;
    let final_response = match with_timeout(timeout, connection.stream.send_body(body)).await {
        Ok(response) => response,
        Err(Error::ResponseError(response)) => return Err(Error::DataError(response)),
        Err(err) => return Err(err),
    };

    Ok(SendResult {
        rejected,
        final_response,
    })
}

/// Writes `MAIL` + every `RCPT` + `DATA` back-to-back and reads all replies
/// in order, per RFC 2920. The message body itself is never pipelined: it
/// only goes out once `DATA`'s reply confirms the server is ready for it.
async fn send_pipelined(
    connection: &mut Connection,
    envelope: &SendEnvelope,
    body: &[u8],
    mail_parameters: &[crate::commands::MailParameter],
    rcpt_parameters: &[RcptParameter],
    timeout: Option<std::time::Duration>,
) -> Result<SendResult, Error> {
    let mail_command = MailCommand::new(envelope.from().cloned(), mail_parameters.to_vec());
    let rcpt_commands: Vec<RcptCommand> = envelope
        .to()
        .iter()
        .map(|recipient| RcptCommand::new(recipient.clone(), rcpt_parameters.to_vec()))
        .collect();

    let data_command = DataCommand;
    let mut batch: Vec<&dyn std::fmt::Display> = Vec::with_capacity(rcpt_commands.len() + 2);
    batch.push(&mail_command);
    for rcpt_command in &rcpt_commands {
        batch.push(rcpt_command);
    }
    batch.push(&data_command);

    let mut responses =
        with_timeout(timeout, connection.stream.execute_batch(&batch)).await?.into_iter();

    let mail_response = responses.next().expect("MAIL reply present in batch result");
    if !mail_response.is_positive() {
        return Err(Error::SenderRefused(mail_response));
    }

    let mut rejected = HashMap::new();
    let mut accepted = 0;
    for recipient in envelope.to() {
        let response = responses.next().expect("one RCPT reply per recipient");
        if response.is_positive() {
            accepted += 1;
        } else {
            rejected.insert(recipient.clone(), response);
        }
    }

    let data_response = responses.next().expect("DATA reply present in batch result");
    if accepted == 0 {
        // The server already replied to the pipelined DATA command (almost
        // always with an error, since it has no accepted recipients); there
        // is nothing to RSET because no body was ever sent.
        return Err(Error::RecipientsRefused(rejected));
    }
    if !data_response.has_code(354) {
        return Err(Error::DataError(data_response));
    }

    let final_response = match with_timeout(timeout, connection.stream.send_body(body)).await {
        Ok(response) => response,
        Err(Error::ResponseError(response)) => return Err(Error::DataError(response)),
        Err(err) => return Err(err),
    };

    Ok(SendResult {
        rejected,
        final_response,
    })
}

async fn with_timeout<F, T>(timeout: Option<std::time::Duration>, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match timeout {
        Some(duration) => tokio_timeout(duration, fut).await?,
        None => fut.await,
    }
}

//! End-to-end scenarios against an in-process fake server.
//!
//! The fake server speaks raw lines over a loopback TCP socket; it has no
//! knowledge of this crate's internals, the same way a real server wouldn't.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use tokio_smtp_client::auth::{Credentials, Mechanism};
use tokio_smtp_client::config::{ConnectionConfigBuilder, Security};
use tokio_smtp_client::{Client, EmailAddress, Error, SendEnvelope, SendableEmail};

/// A scripted reply to one client command: the command is read and discarded,
/// then every line in `reply` is written back verbatim (including its CRLF).
struct Step {
    reply: &'static [&'static str],
}

fn step(reply: &'static [&'static str]) -> Step {
    Step { reply }
}

/// Starts a fake server on a loopback port: sends `greeting`, then for every
/// line of client input runs the next scripted `Step`. Closes the socket
/// (without replying) once the script is exhausted.
async fn spawn_fake_server(greeting: &'static str, script: Vec<Step>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        handle_connection(socket, greeting, script).await;
    });

    addr
}

async fn handle_connection(socket: TcpStream, greeting: &'static str, script: Vec<Step>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(greeting.as_bytes()).await.unwrap();

    for step in script {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.unwrap();
        if read == 0 {
            return;
        }
        for reply_line in step.reply {
            write_half.write_all(reply_line.as_bytes()).await.unwrap();
        }
    }
}

fn test_config(addr: SocketAddr, security: Security) -> tokio_smtp_client::ConnectionConfig {
    ConnectionConfigBuilder::new(addr)
        .security(security)
        .timeout(Some(Duration::from_secs(5)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_happy_path_send() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["250-mail.example.org\r\n", "250 PIPELINING\r\n"]), // EHLO
            step(&["250 ok\r\n"]),                                     // MAIL FROM
            step(&["250 ok\r\n"]),                                     // RCPT TO
            step(&["354 go ahead\r\n"]),                               // DATA
            step(&["250 queued as 12345\r\n"]),                        // end-of-data
            step(&["221 bye\r\n"]),                                    // QUIT
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();

    let from = EmailAddress::new("sender@example.org".to_string()).unwrap();
    let to = EmailAddress::new("recipient@example.org".to_string()).unwrap();
    let envelope = SendEnvelope::new(Some(from), vec![to]).unwrap();
    let email = SendableEmail::new(envelope, b"Subject: hi\r\n\r\nbody\r\n".to_vec());

    let result = client.send(&email).await.unwrap();
    assert!(result.rejected.is_empty());
    assert!(result.final_response.has_code(250));

    client.close().await;
}

#[tokio::test]
async fn test_helo_fallback_when_ehlo_rejected() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["500 command not recognized\r\n"]), // EHLO rejected
            step(&["250 mail.example.org hello\r\n"]),  // HELO
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();
}

#[tokio::test]
async fn test_starttls_not_advertised_fails_before_any_starttls_command() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![step(&["250-mail.example.org\r\n", "250 PIPELINING\r\n"])],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::StartTls));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[tokio::test]
async fn test_starttls_refused_by_server() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["250-mail.example.org\r\n", "250 STARTTLS\r\n"]),
            step(&["454 TLS not available right now\r\n"]),
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::StartTls));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::ResponseError(_)));
}

#[tokio::test]
async fn test_disconnect_during_starttls() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["250-mail.example.org\r\n", "250 STARTTLS\r\n"]),
            step(&[]), // reads the STARTTLS line, replies nothing, then closes
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::StartTls));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::ServerDisconnected(_)));
}

#[tokio::test]
async fn test_partial_recipient_rejection_still_sends() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["250-mail.example.org\r\n", "250 PIPELINING\r\n"]), // EHLO
            step(&["250 ok\r\n"]),                                     // MAIL FROM
            step(&["550 no such user\r\n"]),                           // RCPT TO (rejected)
            step(&["250 ok\r\n"]),                                     // RCPT TO (accepted)
            step(&["354 go ahead\r\n"]),                               // DATA
            step(&["250 queued\r\n"]),                                 // end-of-data
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();

    let from = EmailAddress::new("sender@example.org".to_string()).unwrap();
    let bad = EmailAddress::new("ghost@example.org".to_string()).unwrap();
    let good = EmailAddress::new("real@example.org".to_string()).unwrap();
    let envelope = SendEnvelope::new(Some(from), vec![bad.clone(), good]).unwrap();
    let email = SendableEmail::new(envelope, b"hello\r\n".to_vec());

    let result = client.send(&email).await.unwrap();
    assert_eq!(result.rejected.len(), 1);
    assert!(result.rejected.contains_key(&bad));
}

#[tokio::test]
async fn test_all_recipients_rejected_fails_send() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&["250-mail.example.org\r\n", "250 PIPELINING\r\n"]), // EHLO
            step(&["250 ok\r\n"]),                                     // MAIL FROM
            step(&["550 no such user\r\n"]),                           // RCPT TO (rejected)
            // The pipelined DATA command was already written along with
            // MAIL/RCPT; nothing accepted means no RSET is sent, so this
            // step just drains that already-pipelined DATA line.
            step(&["503 no valid recipients\r\n"]),
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();

    let from = EmailAddress::new("sender@example.org".to_string()).unwrap();
    let bad = EmailAddress::new("ghost@example.org".to_string()).unwrap();
    let envelope = SendEnvelope::new(Some(from), vec![bad]).unwrap();
    let email = SendableEmail::new(envelope, b"hello\r\n".to_vec());

    let err = client.send(&email).await.unwrap_err();
    assert!(matches!(err, Error::RecipientsRefused(_)));
}

/// Reads `MAIL FROM`, `RCPT TO` and `DATA` without replying to any of them,
/// only answering once all three lines have arrived — a server that behaves
/// this way would deadlock a client that waits for each reply before
/// sending the next command, so this proves the client truly pipelines.
async fn handle_pipelined_connection(socket: TcpStream, greeting: &'static str) {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(greeting.as_bytes()).await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap(); // EHLO
    write_half
        .write_all(b"250-mail.example.org\r\n250 PIPELINING\r\n")
        .await
        .unwrap();

    for _ in 0..3 {
        line.clear();
        reader.read_line(&mut line).await.unwrap(); // MAIL, then RCPT, then DATA
    }
    write_half
        .write_all(b"250 ok\r\n250 ok\r\n354 go ahead\r\n")
        .await
        .unwrap();

    line.clear();
    reader.read_line(&mut line).await.unwrap(); // first line of the body
    write_half.write_all(b"250 queued\r\n").await.unwrap();
}

#[tokio::test]
async fn test_pipelined_send_does_not_wait_for_each_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_srv = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        handle_pipelined_connection(socket, "220 mail.example.org ready\r\n").await;
    });

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();

    let from = EmailAddress::new("sender@example.org".to_string()).unwrap();
    let to = EmailAddress::new("recipient@example.org".to_string()).unwrap();
    let envelope = SendEnvelope::new(Some(from), vec![to]).unwrap();
    let email = SendableEmail::new(envelope, b"hi\r\n".to_vec());

    let result = tokio::time::timeout(Duration::from_secs(2), client.send(&email))
        .await
        .expect("send must not block waiting for per-command replies")
        .unwrap();
    assert!(result.rejected.is_empty());
    assert!(result.final_response.has_code(250));
}

#[tokio::test]
async fn test_authenticate_plain_mechanism() {
    let addr_srv = spawn_fake_server(
        "220 mail.example.org ready\r\n",
        vec![
            step(&[
                "250-mail.example.org\r\n",
                "250 AUTH PLAIN LOGIN\r\n",
            ]),
            step(&["235 authenticated\r\n"]),
        ],
    )
    .await;

    let client = Client::new(test_config(addr_srv, Security::None));
    client.connect().await.unwrap();

    client
        .authenticate(
            Credentials::new("user".to_string(), "password".to_string()),
            Some(Mechanism::Plain),
        )
        .await
        .unwrap();
}

//! Connects over STARTTLS, authenticates, and sends one plain-text message.

use tokio_smtp_client::auth::{Credentials, Mechanism};
use tokio_smtp_client::config::ConnectionConfigBuilder;
use tokio_smtp_client::{Client, EmailAddress, SendEnvelope, SendableEmail};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr = tokio::net::lookup_host("smtp.example.org:587")
        .await?
        .next()
        .ok_or("could not resolve smtp.example.org")?;

    let config = ConnectionConfigBuilder::new(addr)
        .server_hostname("smtp.example.org")
        .build()?;

    let client = Client::new(config);
    client.connect().await?;
    client
        .authenticate(
            Credentials::new("user@example.org".to_string(), "hunter2".to_string()),
            Some(Mechanism::Plain),
        )
        .await?;

    let from = EmailAddress::new("user@example.org".to_string())?;
    let to = EmailAddress::new("friend@example.org".to_string())?;
    let envelope = SendEnvelope::new(Some(from), vec![to])?;
    let body = b"From: user@example.org\r\nTo: friend@example.org\r\nSubject: hi\r\n\r\nhello there\r\n";
    let email = SendableEmail::new(envelope, body.to_vec());

    let result = client.send(&email).await?;
    println!("sent: {}", result.final_response);

    client.close().await;
    Ok(())
}

//! Transport stream: plain TCP, upgradeable in place to TLS.

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_native_tls::{TlsConnector, TlsStream};
use pin_project::pin_project;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::Error;

/// TLS parameters used for the initial handshake or a later STARTTLS upgrade.
pub struct ClientTlsParameters {
    /// Connector carrying the `native-tls` configuration (cert validation, client certs, ...).
    pub connector: Arc<TlsConnector>,
    /// Server name sent in the TLS handshake (SNI) and checked against its certificate.
    pub domain: String,
}

impl fmt::Debug for ClientTlsParameters {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ClientTlsParameters")
            .field("connector", &"TlsConnector")
            .field("domain", &self.domain)
            .finish()
    }
}

impl ClientTlsParameters {
    /// Creates new TLS parameters for the given server name.
    pub fn new(domain: String, connector: Arc<TlsConnector>) -> ClientTlsParameters {
        ClientTlsParameters { connector, domain }
    }
}

/// The underlying transport of a connection: plain until (and unless) a TLS
/// handshake happens, either up front or via `STARTTLS`.
#[pin_project(project = NetworkStreamProj)]
#[allow(missing_debug_implementations)]
pub enum NetworkStream {
    /// Plain TCP.
    Tcp(#[pin] TcpStream),
    /// TLS over TCP.
    Tls(#[pin] TlsStream<TcpStream>),
}

impl NetworkStream {
    /// Opens a TCP connection to `addr`, optionally wrapping it in TLS immediately
    /// (used for implicit-TLS ports; STARTTLS upgrades an existing plain stream instead).
    pub async fn connect(
        addr: SocketAddr,
        timeout: Option<Duration>,
        tls_parameters: Option<&ClientTlsParameters>,
    ) -> Result<NetworkStream, Error> {
        let tcp_stream = with_timeout(timeout, TcpStream::connect(addr)).await?;

        match tls_parameters {
            Some(params) => {
                let tls_stream =
                    with_timeout(timeout, params.connector.connect(&params.domain, tcp_stream))
                        .await?;
                Ok(NetworkStream::Tls(tls_stream))
            }
            None => Ok(NetworkStream::Tcp(tcp_stream)),
        }
    }

    /// Upgrades a plain stream to TLS in place, consuming it. A no-op on an
    /// already-encrypted stream.
    pub async fn upgrade_tls(self, tls_parameters: &ClientTlsParameters) -> Result<Self, Error> {
        match self {
            NetworkStream::Tcp(stream) => {
                let tls_stream = tls_parameters
                    .connector
                    .connect(&tls_parameters.domain, stream)
                    .await?;
                Ok(NetworkStream::Tls(tls_stream))
            }
            NetworkStream::Tls(_) => Ok(self),
        }
    }

    /// `true` once the stream is TLS-encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, NetworkStream::Tls(_))
    }

    /// Shuts the connection down, best-effort.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        match self {
            NetworkStream::Tcp(s) => s.shutdown().await,
            NetworkStream::Tls(s) => s.get_mut().shutdown().await,
        }
    }
}

async fn with_timeout<F, T, E>(timeout: Option<Duration>, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, E>>,
    Error: From<E>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut).await?.map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_read(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_write(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_flush(cx),
            NetworkStreamProj::Tls(s) => s.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_shutdown(cx),
            NetworkStreamProj::Tls(s) => s.poll_shutdown(cx),
        }
    }
}

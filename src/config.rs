//! Connection configuration and its validating builder.

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_native_tls::{Certificate, Identity, TlsConnector};

use crate::error::Error;
use crate::session::ClientId;

/// How a connection should be secured.
#[derive(Clone, Copy, Debug)]
pub enum Security {
    /// No TLS at all.
    None,
    /// TLS from the very first byte (the "implicit TLS" / SMTPS style, e.g. port 465).
    Wrapped,
    /// Plain until a `STARTTLS` command succeeds (RFC 3207, e.g. port 587).
    StartTls,
}

/// Fully validated parameters for one connection attempt.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) server_hostname: String,
    pub(crate) client_id: ClientId,
    pub(crate) security: Security,
    pub(crate) tls_connector: Arc<TlsConnector>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) expect_greeting: bool,
}

impl Debug for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("addr", &self.addr)
            .field("server_hostname", &self.server_hostname)
            .field("client_id", &self.client_id)
            .field("security", &self.security)
            .field("tls_connector", &"TlsConnector")
            .field("timeout", &self.timeout)
            .field("expect_greeting", &self.expect_greeting)
            .finish()
    }
}

/// Builds a [`ConnectionConfig`], validating every mutually-exclusive option
/// combination up front so invalid configuration never reaches an I/O call.
#[derive(Debug)]
pub struct ConnectionConfigBuilder {
    addr: SocketAddr,
    server_hostname: Option<String>,
    client_id: ClientId,
    security: Security,
    danger_accept_invalid_certs: bool,
    danger_accept_invalid_hostnames: bool,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    cert_bundle_path: Option<PathBuf>,
    tls_context: Option<TlsConnector>,
    timeout: Option<Duration>,
    expect_greeting: bool,
}

impl ConnectionConfigBuilder {
    /// Starts a builder for a connection to `addr`.
    pub fn new(addr: SocketAddr) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            addr,
            server_hostname: None,
            client_id: ClientId::hostname(),
            security: Security::StartTls,
            danger_accept_invalid_certs: false,
            danger_accept_invalid_hostnames: false,
            client_cert_path: None,
            client_key_path: None,
            cert_bundle_path: None,
            tls_context: None,
            timeout: Some(Duration::from_secs(60)),
            expect_greeting: true,
        }
    }

    /// Sets the name to present in `EHLO`/`HELO`. Defaults to the local hostname.
    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the server name used for SNI and certificate validation.
    ///
    /// Defaults to the numeric address if never set; callers connecting by IP
    /// to a name-based virtual host should set this explicitly.
    pub fn server_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.server_hostname = Some(hostname.into());
        self
    }

    /// How the connection should be secured. Defaults to [`Security::StartTls`].
    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Skips certificate chain validation. Dangerous; for testing only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Skips hostname verification. Dangerous; for testing only.
    pub fn danger_accept_invalid_hostnames(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_hostnames = accept;
        self
    }

    /// Client certificate to present during the TLS handshake, as a
    /// PEM certificate chain path paired with its PEM private key path.
    ///
    /// Mutually exclusive with [`Self::tls_context`]; `build()` fails if
    /// both are set.
    pub fn client_cert(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Extra PEM root certificate(s) to trust in addition to the system
    /// trust store.
    ///
    /// Mutually exclusive with [`Self::tls_context`]; `build()` fails if
    /// both are set.
    pub fn cert_bundle(mut self, bundle_path: impl Into<PathBuf>) -> Self {
        self.cert_bundle_path = Some(bundle_path.into());
        self
    }

    /// Supplies an already-built TLS connector, bypassing the cert/key/bundle
    /// and danger flags entirely.
    ///
    /// Mutually exclusive with [`Self::client_cert`]/[`Self::cert_bundle`];
    /// `build()` fails if both are set.
    pub fn tls_context(mut self, connector: TlsConnector) -> Self {
        self.tls_context = Some(connector);
        self
    }

    /// Per-command timeout. `None` disables timeouts entirely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether to require a `220` greeting right after connecting. Some
    /// proxies and load balancers omit it; defaults to `true`.
    pub fn expect_greeting(mut self, expect: bool) -> Self {
        self.expect_greeting = expect;
        self
    }

    /// Validates the accumulated options and produces a [`ConnectionConfig`].
    pub fn build(self) -> Result<ConnectionConfig, Error> {
        let addr = self.addr;
        let server_hostname = self
            .server_hostname
            .unwrap_or_else(|| addr.ip().to_string());

        let has_cert_options = self.client_cert_path.is_some()
            || self.client_key_path.is_some()
            || self.cert_bundle_path.is_some();
        if self.tls_context.is_some() && has_cert_options {
            return Err(Error::IllegalArgument(
                "tls_context is mutually exclusive with client_cert/cert_bundle",
            ));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(Error::IllegalArgument(
                "client_cert requires both a certificate and a key path",
            ));
        }

        let connector = match self.tls_context {
            Some(connector) => connector,
            None => {
                let mut connector = TlsConnector::new();
                if self.danger_accept_invalid_certs {
                    connector = connector.danger_accept_invalid_certs(true);
                }
                if self.danger_accept_invalid_hostnames {
                    connector = connector.danger_accept_invalid_hostnames(true);
                }
                if let Some(bundle_path) = self.cert_bundle_path {
                    let pem = std::fs::read(&bundle_path).map_err(Error::Io)?;
                    let cert = Certificate::from_pem(&pem).map_err(Error::Tls)?;
                    connector = connector.add_root_certificate(cert);
                }
                if let (Some(cert_path), Some(key_path)) =
                    (self.client_cert_path, self.client_key_path)
                {
                    let cert_pem = std::fs::read(&cert_path).map_err(Error::Io)?;
                    let key_pem = std::fs::read(&key_path).map_err(Error::Io)?;
                    let identity = Identity::from_pkcs8(&cert_pem, &key_pem).map_err(Error::Tls)?;
                    connector = connector.identity(identity);
                }
                connector
            }
        };

        Ok(ConnectionConfig {
            addr: self.addr,
            server_hostname,
            client_id: self.client_id,
            security: self.security,
            tls_connector: Arc::new(connector),
            timeout: self.timeout,
            expect_greeting: self.expect_greeting,
        })
    }
}

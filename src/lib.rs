//! Async implementation of an SMTP client in Rust, built on `tokio`.
//!
//! This client follows [RFC 5321](https://tools.ietf.org/html/rfc5321) and is
//! designed to submit mail through a relay server, relying on that server for
//! full RFC compliance checking rather than re-implementing it here.
//!
//! It implements the following extensions:
//!
//! * PIPELINING ([RFC 2920](https://tools.ietf.org/html/rfc2920))
//! * SIZE ([RFC 1870](https://tools.ietf.org/html/rfc1870))
//! * 8BITMIME ([RFC 6152](https://tools.ietf.org/html/rfc6152))
//! * SMTPUTF8 ([RFC 6531](https://tools.ietf.org/html/rfc6531))
//! * STARTTLS ([RFC 3207](https://tools.ietf.org/html/rfc3207))
//! * AUTH ([RFC 4954](https://tools.ietf.org/html/rfc4954)) with PLAIN, LOGIN and CRAM-MD5
//! * DSN parameters on `MAIL FROM`/`RCPT TO`

#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    missing_debug_implementations,
    missing_docs,
    clippy::unwrap_used
)]

pub mod api;
pub mod auth;
mod client;
mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod net;
pub mod response;
pub mod session;
mod stream;
pub mod types;

pub use crate::api::{send, send_message};
pub use crate::client::{Client, Lifecycle};
pub use crate::config::{ConnectionConfig, ConnectionConfigBuilder, Security};
pub use crate::error::Error;
pub use crate::types::{EmailAddress, Message, SendEnvelope, SendResult, SendableEmail};

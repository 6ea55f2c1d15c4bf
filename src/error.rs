//! Error and result type for the SMTP client

use self::Error::*;
use crate::response::Response;
use crate::types::EmailAddress;
use std::collections::HashMap;
use std::io;

/// An enum of all error kinds the client can return.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Could not establish the transport or TLS, or the initial greeting was not 220.
    #[error("connect error: {0}")]
    ConnectError(String),
    /// The peer closed the connection unexpectedly, or the client closed it after a fatal error.
    #[error("server disconnected: {0}")]
    ServerDisconnected(String),
    /// A command exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    /// A response line did not match `\d{3}[ -].*`, or a multi-line reply mixed codes.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// A line exceeded the configured maximum length before a CRLF was seen.
    #[error("line too long")]
    LineTooLong,
    /// The server returned a non-2xx code where a success was required.
    #[error("{0}")]
    ResponseError(Response),
    /// A requested extension is not advertised by the server.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// The final AUTH reply was not 235, or no mutually supported mechanism exists.
    #[error("authentication error: {0}")]
    AuthenticationError(String),
    /// MAIL FROM was refused.
    #[error("sender refused: {0}")]
    SenderRefused(Response),
    /// Every RCPT TO in the envelope was refused.
    #[error("all recipients refused")]
    RecipientsRefused(HashMap<EmailAddress, Response>),
    /// The end-of-DATA reply was not 2xx.
    #[error("data error: {0}")]
    DataError(Response),
    /// The message exceeds the server's advertised SIZE limit.
    #[error("message too large: {size} bytes, server accepts at most {max_size}")]
    MessageTooLarge {
        /// Size of the message to send, in bytes.
        size: u64,
        /// Maximum size advertised by the server.
        max_size: u64,
    },
    /// Invalid configuration or argument (mutually exclusive options, CRLF injection, ...).
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),
    /// Underlying I/O error.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// TLS handshake or configuration error.
    #[error("tls: {0}")]
    Tls(#[from] async_native_tls::Error),
    /// Response parsing failure at the nom-combinator level.
    #[error("parsing: {0:?}")]
    Parsing(nom::error::ErrorKind),
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Error {
        Parsing(match err {
            nom::Err::Incomplete(_) => nom::error::ErrorKind::Complete,
            nom::Err::Failure(e) => e.code,
            nom::Err::Error(e) => e.code,
        })
    }
}

impl From<Response> for Error {
    fn from(response: Response) -> Error {
        ResponseError(response)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Error {
        AuthenticationError(format!("invalid base64 challenge: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Error {
        AuthenticationError(format!("non-UTF8 challenge: {}", err))
    }
}

/// SMTP result type.
pub type SmtpResult = Result<Response, Error>;

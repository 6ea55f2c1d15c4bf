//! Line-oriented framing on top of a [`NetworkStream`](crate::net::NetworkStream).

use std::fmt::Display;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::codec::stuff;
use crate::error::Error;
use crate::net::{ClientTlsParameters, NetworkStream};
use crate::response::{Response, ResponseAccumulator};

/// Longest reply line accepted before giving up with [`Error::LineTooLong`].
///
/// RFC 5321 section 4.5.3.1.5 caps a reply line at 512 octets; some servers
/// send longer EHLO banners in practice, so this is generous.
const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Returns the string with all CRLFs replaced by `<CRLF>`, for debug logging.
fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}

/// Wraps a connected stream with SMTP command/response framing.
#[allow(missing_debug_implementations)]
pub struct SmtpStream {
    inner: BufReader<NetworkStream>,
}

impl SmtpStream {
    /// Wraps an already-connected stream.
    pub fn new(stream: NetworkStream) -> SmtpStream {
        SmtpStream {
            inner: BufReader::new(stream),
        }
    }

    /// `true` if the underlying transport is TLS-encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.inner.get_ref().is_encrypted()
    }

    /// Consumes this stream and upgrades the transport to TLS, used for `STARTTLS`.
    pub async fn upgrade_tls(self, tls_parameters: &ClientTlsParameters) -> Result<SmtpStream, Error> {
        let stream = self.inner.into_inner();
        let upgraded = stream.upgrade_tls(tls_parameters).await?;
        Ok(SmtpStream::new(upgraded))
    }

    /// Writes one command line and reads back its response.
    pub async fn command<C: Display>(&mut self, command: C) -> Result<Response, Error> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Writes a command without waiting for a response; used for PIPELINING.
    pub async fn send_command<C: Display>(&mut self, command: C) -> Result<(), Error> {
        self.write(command.to_string().as_bytes()).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let stream = self.inner.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        debug!(">> {}", escape_crlf(String::from_utf8_lossy(data).as_ref()));
        Ok(())
    }

    /// Reads one (possibly multi-line) SMTP reply from the wire.
    pub async fn read_response(&mut self) -> Result<Response, Error> {
        let response = self.read_raw_response().await?;
        if response.is_positive() {
            Ok(response)
        } else {
            Err(response.into())
        }
    }

    /// Reads one (possibly multi-line) SMTP reply without classifying its
    /// code; used where the caller, not the framer, decides what counts as
    /// success (e.g. per-recipient RCPT classification in a pipelined batch).
    pub async fn read_raw_response(&mut self) -> Result<Response, Error> {
        let mut accumulator = ResponseAccumulator::default();
        let mut line = String::with_capacity(128);

        loop {
            line.clear();
            let read = read_line(&mut self.inner, &mut line).await?;
            if read == 0 {
                return Err(Error::ServerDisconnected(
                    "connection closed by peer".to_string(),
                ));
            }
            debug!("<< {}", escape_crlf(&line));

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if let Some(response) = accumulator.push(trimmed)? {
                return Ok(response);
            }
        }
    }

    /// Writes every command back-to-back, then reads one reply per command
    /// in order. Used for `PIPELINING`: requires that none of `commands`
    /// changes the framing of the session (no `STARTTLS`, no `DATA` body).
    ///
    /// On success the returned `Vec` has exactly `commands.len()` entries,
    /// each possibly carrying a non-2xx code for the caller to classify. A
    /// transport or framing error aborts the remaining reads; no partial
    /// `Vec` is returned.
    pub async fn execute_batch(&mut self, commands: &[&dyn Display]) -> Result<Vec<Response>, Error> {
        for command in commands {
            self.write(command.to_string().as_bytes()).await?;
        }
        let mut responses = Vec::with_capacity(commands.len());
        for _ in commands {
            responses.push(self.read_raw_response().await?);
        }
        Ok(responses)
    }

    /// Sends a message body for the `DATA` command: dot-stuffs it, writes the
    /// terminating `\r\n.\r\n`, and reads the final response.
    pub async fn send_body(&mut self, body: &[u8]) -> Result<Response, Error> {
        let stuffed = stuff(body);
        self.write(&stuffed).await?;
        if !stuffed.ends_with(b"\r\n") {
            self.write(b"\r\n").await?;
        }
        self.write(b".\r\n").await?;
        self.read_response().await
    }
}

/// Reads one line (including its terminator, if any) into `buf`, replacing it first.
///
/// Fails with [`Error::LineTooLong`] if no terminator appears within
/// [`MAX_LINE_LENGTH`] bytes. Returns the number of bytes read, `0` on a
/// clean EOF with nothing buffered.
async fn read_line(reader: &mut BufReader<NetworkStream>, buf: &mut String) -> Result<usize, Error> {
    let read = reader.read_line(buf).await?;
    if buf.len() > MAX_LINE_LENGTH {
        return Err(Error::LineTooLong);
    }
    Ok(read)
}

#[cfg(test)]
mod test {
    use super::escape_crlf;

    #[test]
    fn test_escape_crlf() {
        assert_eq!(escape_crlf("\r\n"), "<CRLF>");
        assert_eq!(escape_crlf("EHLO my_name\r\n"), "EHLO my_name<CRLF>");
        assert_eq!(
            escape_crlf("EHLO my_name\r\nSIZE 42\r\n"),
            "EHLO my_name<CRLF>SIZE 42<CRLF>"
        );
    }
}

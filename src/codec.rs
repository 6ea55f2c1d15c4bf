//! Dot-stuffing transparency codec for the DATA command body.
//!
//! [RFC 5321, section 4.5.2](https://tools.ietf.org/html/rfc5321#section-4.5.2):
//! before sending a line of mail text, the client checks the first character
//! of the line; if it is a period, one additional period is inserted.

/// Applies dot-stuffing to a CRLF-terminated message body.
///
/// Every line beginning with `.` is prefixed with an extra `.`, so the
/// five-byte end-of-data marker `\r\n.\r\n` can never occur inside the body.
pub fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in body.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
    out
}

/// Reverses [`stuff`], removing one leading `.` from any line that starts with one.
///
/// Used by tests to check the stuff/unstuff round trip; the client never needs
/// to unstuff data it sends itself.
pub fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b".") {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

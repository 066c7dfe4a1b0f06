// Framing primitives for the two wire regimes.
//
// The replication protocol runs two framings over one TCP connection, never
// interleaved within a single exchange:
//
// - **Line framing** (COMMAND/MONITOR modes): newline-terminated UTF-8.
//   Carriage returns are stripped on read so telnet-style clients work.
// - **NUL framing** (bulk transfer and config-text delivery): NUL-terminated
//   strings for the header fields, followed by raw unframed file bytes whose
//   boundaries are implied by the previously declared sizes.
//
// All helpers operate on generic `Read`/`Write`/`BufRead` so they work on
// blocking TCP streams, buffered wrappers, and in-memory cursors in tests.
//
// A `MAX_CSTRING_LEN` guard protects the NUL-string reader from unbounded
// allocation on a malformed or hostile peer. Config texts are the largest
// expected NUL strings; 1 MB is generous headroom.

use std::io::{self, BufRead, Read, Write};

/// Literal terminator for multi-row line replies.
pub const DONE: &str = "DONE";
/// Positive single-line reply.
pub const OK: &str = "OK";
/// Negative reply prefix; may be followed by a detail string.
pub const ERROR: &str = "ERROR";
/// Prompt written with no trailing newline when prompting is enabled.
pub const PROMPT: &str = "> ";
/// Greeting prefix; the server appends its version, and ` local` on the
/// privileged loopback listener.
pub const GREETING_PREFIX: &str = "merccc-";
/// Acknowledgment string terminating a bulk transfer, NUL-framed.
pub const TRANSFER_ACK: &str = "done";

/// Maximum accepted NUL-terminated string length (1 MB).
pub const MAX_CSTRING_LEN: usize = 1024 * 1024;

/// Read one newline-terminated line, stripping the trailing `\n` and any
/// `\r`. Returns `Ok(None)` on clean end of stream.
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Write one line followed by `\n` and flush.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read a NUL-terminated UTF-8 string.
///
/// Returns `UnexpectedEof` if the stream ends before the terminator and
/// `InvalidData` if the string exceeds [`MAX_CSTRING_LEN`] or is not UTF-8.
pub fn read_cstring<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut limited = reader.take(MAX_CSTRING_LEN as u64 + 1);
    limited.read_until(0, &mut buf)?;
    match buf.last() {
        Some(0) => {
            buf.pop();
        }
        Some(_) if buf.len() > MAX_CSTRING_LEN => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("NUL string exceeds {MAX_CSTRING_LEN} bytes"),
            ));
        }
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended before NUL terminator",
            ));
        }
    }
    String::from_utf8(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {e}")))
}

/// Write a string followed by a single NUL byte and flush.
pub fn write_cstring<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0])?;
    writer.flush()
}

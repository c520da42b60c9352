//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```
//!
//! Header lines and the body are read through the same `BufRead`, so bytes
//! buffered while scanning headers are the first bytes of the body.

use std::io::{self, BufRead, Read, Write};

use crate::common::{Error, Result};

use super::types::ProtocolMessage;

const CONTENT_LENGTH: &str = "Content-Length";

/// Longest header line accepted, not counting its `\n`
const MAX_HEADER_LINE: usize = 1024;

/// Read one header line; `None` at end of stream
fn read_header_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let bytes_read = reader
        .by_ref()
        .take(MAX_HEADER_LINE as u64 + 1)
        .read_until(b'\n', &mut raw)?;
    if bytes_read == 0 {
        return Ok(None);
    }
    if raw.len() > MAX_HEADER_LINE && raw.last() != Some(&b'\n') {
        return Err(Error::framing(format!(
            "Header line exceeds {} bytes",
            MAX_HEADER_LINE
        )));
    }
    let line = String::from_utf8(raw)
        .map_err(|_| Error::framing("Header line is not valid UTF-8"))?;
    Ok(Some(line))
}

/// Parse the value of a Content-Length header
fn parse_content_length(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::framing(format!("Invalid Content-Length: {}", value.trim())))
}

/// Read one framed message body
///
/// Returns `Ok(None)` when the stream ends cleanly before a new message
/// starts. Lines without a `name: value` shape are logged and skipped. An
/// end of stream inside a header block or a body is a framing error, as is
/// a header line longer than `MAX_HEADER_LINE` or a body longer than
/// `max_len`.
pub fn read_frame<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    let mut seen_header = false;

    loop {
        let line = match read_header_line(reader)? {
            Some(line) => line,
            None if !seen_header => return Ok(None),
            None => return Err(Error::framing("Stream ended inside a header block")),
        };

        // Empty line (just \r\n) signals end of headers
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if seen_header {
                break;
            }
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            tracing::warn!(line, "Unexpected line in header block");
            continue;
        };
        seen_header = true;

        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let len = parse_content_length(value)?;
            match content_length {
                Some(previous) if previous != len => {
                    return Err(Error::framing(format!(
                        "Conflicting Content-Length headers: {} and {}",
                        previous, len
                    )));
                }
                _ => content_length = Some(len),
            }
        } else {
            // Ignore other headers (like Content-Type)
            tracing::debug!(header = %name.trim(), "Ignoring header");
        }
    }

    let len = content_length.ok_or_else(|| Error::framing("Missing Content-Length header"))?;

    if len > max_len {
        return Err(Error::framing(format!(
            "Content-Length {} exceeds maximum of {} bytes",
            len, max_len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::framing(format!("Truncated body: expected {} bytes", len))
        } else {
            Error::Io(e)
        }
    })?;

    Ok(Some(body))
}

/// Write one framed message
///
/// Header and body go out in a single `write_all` so an emission is never
/// split around another writer's output.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);

    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Decode a message body
pub fn decode_message(body: &[u8]) -> Result<ProtocolMessage> {
    serde_json::from_slice(body).map_err(|e| Error::framing(format!("Malformed JSON body: {}", e)))
}

/// Encode a message as compact JSON
pub fn encode_message(message: &ProtocolMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Read and decode one DAP message
pub fn read_message<R: BufRead>(reader: &mut R, max_len: usize) -> Result<Option<ProtocolMessage>> {
    match read_frame(reader, max_len)? {
        Some(body) => {
            tracing::trace!(body = %String::from_utf8_lossy(&body), "<- frame");
            decode_message(&body).map(Some)
        }
        None => Ok(None),
    }
}

/// Encode and write one DAP message
pub fn write_message<W: Write>(writer: &mut W, message: &ProtocolMessage) -> Result<()> {
    let body = encode_message(message)?;
    tracing::trace!(body = %String::from_utf8_lossy(&body), "-> frame");
    write_frame(writer, &body)
}

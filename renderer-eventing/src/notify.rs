//! Inbound NOTIFY parsing.
//!
//! Each accepted connection carries exactly one HTTP-like request. Only
//! NOTIFY is served here; everything else on the wire belongs to the outer
//! surfaces of the system and is rejected.

use crate::error::NotifyError;
use crate::message::{EventKind, EventMessage};
use std::io::{BufRead, Read, Write};

/// Refuse bodies beyond this size; property blobs are small.
const MAX_BODY: usize = 256 * 1024;

/// Headers the core extracts; all other headers are ignored.
#[derive(Debug, Default)]
struct NotifyHeaders {
    sid: String,
    seq: String,
    nt: String,
    nts: String,
    content_length: usize,
}

/// Parse one NOTIFY request into an [`EventMessage`].
///
/// The subject is `[sid, seq, body]` — the conventional SID, sequence
/// number and property blob. The core does not interpret them.
pub(crate) fn parse_notify<R: BufRead>(reader: &mut R) -> Result<EventMessage, NotifyError> {
    let request_line = read_crlf_line(reader)?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| NotifyError::Malformed("empty request line".into()))?;
    let _path = parts
        .next()
        .ok_or_else(|| NotifyError::Malformed("request line lacks a target".into()))?;
    if !method.eq_ignore_ascii_case("NOTIFY") {
        return Err(NotifyError::UnsupportedMethod(method.to_string()));
    }

    let headers = parse_headers(reader)?;
    if headers.content_length > MAX_BODY {
        return Err(NotifyError::Malformed(format!(
            "body of {} bytes exceeds limit",
            headers.content_length
        )));
    }
    let mut body = vec![0u8; headers.content_length];
    reader.read_exact(&mut body)?;
    let body = String::from_utf8_lossy(&body).into_owned();

    let kind = if headers.nt.eq_ignore_ascii_case("upnp:event")
        && headers.nts.eq_ignore_ascii_case("upnp:propchange")
    {
        EventKind::UpnpPropertyChange
    } else {
        EventKind::Unknown
    };
    Ok(EventMessage::new(kind, vec![headers.sid, headers.seq, body]))
}

fn parse_headers<R: BufRead>(reader: &mut R) -> Result<NotifyHeaders, NotifyError> {
    let mut headers = NotifyHeaders::default();
    loop {
        let line = read_crlf_line(reader)?;
        if line.is_empty() {
            return Ok(headers);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| NotifyError::Malformed(format!("bad header line: {line}")))?;
        let value = value.trim();
        match name.trim().to_ascii_uppercase().as_str() {
            "SID" => headers.sid = value.to_string(),
            "SEQ" => headers.seq = value.to_string(),
            "NT" => headers.nt = value.to_string(),
            "NTS" => headers.nts = value.to_string(),
            "CONTENT-LENGTH" => {
                headers.content_length = value
                    .parse()
                    .map_err(|_| NotifyError::Malformed(format!("bad content length: {value}")))?;
            }
            _ => {}
        }
    }
}

fn read_crlf_line<R: BufRead>(reader: &mut R) -> Result<String, NotifyError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(NotifyError::Malformed("unexpected end of request".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Write the one-line response for a parse outcome.
pub(crate) fn write_response<W: Write>(
    writer: &mut W,
    result: &Result<EventMessage, NotifyError>,
) -> std::io::Result<()> {
    let status = match result {
        Ok(_) => "200 OK",
        Err(NotifyError::UnsupportedMethod(_)) => "405 Method Not Allowed",
        Err(_) => "400 Bad Request",
    };
    write!(
        writer,
        "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )?;
    writer.flush()
}

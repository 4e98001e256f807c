//! Minimal HTTP/1.1 framing for the attendance API.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Read one request (head plus `Content-Length` body) from a client.
    pub fn read_from(stream: &mut std::net::TcpStream) -> Result<Self> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Self::parse(stream)
    }

    fn parse(reader: &mut impl Read) -> Result<Self> {
        let mut chunk = [0u8; 1024];
        let mut raw = Vec::new();
        let head_len = loop {
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break raw.len();
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.len() > MAX_REQUEST_BYTES {
                return Err(anyhow!("request exceeds {} bytes", MAX_REQUEST_BYTES));
            }
        };

        let head = String::from_utf8_lossy(&raw[..head_len]).into_owned();
        let mut lines = head.split("\r\n");
        let (method, target) = lines
            .next()
            .and_then(|line| {
                let mut words = line.split_whitespace();
                Some((words.next()?, words.next()?))
            })
            .ok_or_else(|| anyhow!("malformed request line"))?;
        let headers: HashMap<String, String> = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let body_len = match headers.get("content-length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| anyhow!("bad content-length '{}'", value))?,
            None => 0,
        };
        if head_len + body_len > MAX_REQUEST_BYTES {
            return Err(anyhow!("request exceeds {} bytes", MAX_REQUEST_BYTES));
        }
        let mut body = raw.split_off(head_len);
        while body.len() < body_len {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return Err(anyhow!("client closed before sending the full body"));
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(body_len);

        let path = match target.split_once('?') {
            Some((path, _query)) => path,
            None => target,
        };
        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            body,
        })
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Write a complete response and leave the connection to be closed.
pub(crate) fn respond(
    out: &mut impl Write,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status,
        reason_phrase(status),
        content_type,
        body.len()
    )?;
    out.write_all(body)?;
    Ok(())
}

pub(crate) fn respond_json(out: &mut impl Write, status: u16, body: &str) -> Result<()> {
    respond(out, status, "application/json", body.as_bytes())
}

/// Response head for an open-ended stream; chunks follow until the client leaves.
pub(crate) fn start_stream(out: &mut impl Write, content_type: &str) -> Result<()> {
    write!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache, no-store, must-revalidate\r\nPragma: no-cache\r\nExpires: 0\r\nConnection: close\r\n\r\n",
        content_type
    )?;
    Ok(())
}

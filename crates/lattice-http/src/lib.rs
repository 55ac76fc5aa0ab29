//! A minimal, zero-copy HTTP/1.1 message view, sized for the one thing a
//! byte-stream core needs HTTP for: parsing and building the upgrade
//! handshake exchanged before a WebSocket stream takes over the wire.
//! Not a general-purpose HTTP implementation: no chunked bodies, no
//! content negotiation, no connection reuse.

const LINE_END: &str = "\r\n";
const HEADERS_END: &str = "\r\n\r\n";

/// A view into an already-received buffer: every field borrows from
/// `buffer` rather than copying it, mirroring the zero-allocation parse
/// this is grounded on.
#[derive(Debug, Default)]
pub struct MsgView<'a> {
    pub method: Option<&'a str>,
    pub uri: Option<&'a str>,
    pub version: Option<&'a str>,
    pub status: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub headers: &'a str,
    pub body: &'a str,
}

impl<'a> MsgView<'a> {
    /// Parses a request line (`METHOD URI VERSION`). Returns `None` if the
    /// header block hasn't fully arrived yet; the caller should keep
    /// buffering and retry.
    pub fn parse_request(buffer: &'a str) -> Option<Self> {
        let (first, second, third, headers, body) = view_parse(buffer)?;
        Some(Self {
            method: Some(first),
            uri: second,
            version: third,
            status: None,
            reason: None,
            headers,
            body,
        })
    }

    /// Parses a status line (`VERSION STATUS REASON`).
    pub fn parse_response(buffer: &'a str) -> Option<Self> {
        let (first, second, third, headers, body) = view_parse(buffer)?;
        Some(Self {
            method: None,
            uri: None,
            version: Some(first),
            status: second,
            reason: third,
            headers,
            body,
        })
    }

    /// Looks up a header by case-insensitive name, trimming surrounding
    /// whitespace from the value. Scans the raw header block line by
    /// line rather than building a map, since a handshake has only a
    /// handful of headers.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        header_find(self.headers, name)
    }
}

fn view_parse(buffer: &str) -> Option<(&str, Option<&str>, Option<&str>, &str, &str)> {
    let headers_end = buffer.find(HEADERS_END)?;
    let body = &buffer[headers_end + HEADERS_END.len()..];
    let first_line_end = buffer.find(LINE_END)?;
    let headers = &buffer[first_line_end + LINE_END.len()..headers_end + LINE_END.len()];

    let first_line = buffer[..first_line_end].trim_start();
    let mut parts = first_line.splitn(2, ' ');
    let first = parts.next().unwrap_or(first_line);
    let rest = parts.next().map(str::trim_start);

    let (second, third) = match rest {
        Some(rest) => {
            let mut parts = rest.splitn(2, ' ');
            let second = parts.next();
            let third = parts.next().map(str::trim_start);
            (second, third)
        }
        None => (None, None),
    };

    Some((first, second, third, headers, body))
}

fn header_find<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    for line in headers.split(LINE_END) {
        let line = line.trim_start();
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.find(':') else { continue };
        let (candidate, value) = line.split_at(colon);
        if candidate.trim_end().eq_ignore_ascii_case(name) {
            return Some(value[1..].trim_start());
        }
    }
    None
}

/// Builds an owned request/response message for the handshake, since
/// outgoing HTTP is always short-lived and small.
#[derive(Debug, Default)]
pub struct MsgBuilder {
    first_line: String,
    headers: Vec<(String, String)>,
}

impl MsgBuilder {
    pub fn request(method: &str, uri: &str, version: &str) -> Self {
        Self { first_line: format!("{method} {uri} {version}"), headers: Vec::new() }
    }

    pub fn response(version: &str, status: u16, reason: &str) -> Self {
        Self { first_line: format!("{version} {status} {reason}"), headers: Vec::new() }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = String::with_capacity(128);
        out.push_str(&self.first_line);
        out.push_str(LINE_END);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str(LINE_END);
        }
        out.push_str(LINE_END);
        out.into_bytes()
    }
}

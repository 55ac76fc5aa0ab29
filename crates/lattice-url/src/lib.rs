//! Parses the `scheme://user@host:port/path?query` URLs used to address
//! an MQTT or WebSocket endpoint, and maps a scheme name to its default
//! port and whether it implies TLS.

/// One entry of the known-scheme table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Scheme {
    pub name: &'static str,
    pub port: u16,
    pub encrypted: bool,
}

const SCHEMES: &[Scheme] = &[
    Scheme { name: "mqtts", port: 8883, encrypted: true },
    Scheme { name: "mqtt", port: 1883, encrypted: false },
    Scheme { name: "wss", port: 443, encrypted: true },
    Scheme { name: "ws", port: 80, encrypted: false },
];

/// Looks up a scheme name, ignoring anything past it (so `"mqtt"` and
/// `"mqtt://host"` both match the `mqtt` entry).
pub fn parse_scheme(scheme: &str) -> Option<Scheme> {
    SCHEMES.iter().find(|s| scheme.starts_with(s.name)).copied()
}

/// A parsed URL: every field is a view into the original string.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Url<'a> {
    pub scheme: Option<&'a str>,
    pub userinfo: Option<&'a str>,
    pub host: Option<&'a str>,
    pub port: Option<&'a str>,
    pub path: Option<&'a str>,
    pub query: Option<&'a str>,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Self {
        let (scheme, rest) = match url.find("://") {
            Some(idx) => (Some(&url[..idx]), &url[idx + 3..]),
            None => (None, url),
        };

        if rest.starts_with('/') {
            let (path, query) = split_query(rest);
            return Self { scheme, userinfo: None, host: None, port: None, path: Some(path), query };
        }

        let (userinfo, rest) = match rest.find('@') {
            Some(idx) => (Some(&rest[..idx]), &rest[idx + 1..]),
            None => (None, rest),
        };

        let colon = rest.find(':');
        let slash = rest.find('/');

        let (host, port, tail) = match (colon, slash) {
            (None, None) => (rest, None, None),
            (None, Some(s)) => (&rest[..s], None, Some(&rest[s..])),
            (Some(c), None) => (&rest[..c], Some(&rest[c + 1..]), None),
            (Some(c), Some(s)) if c < s => (&rest[..c], Some(&rest[c + 1..s]), Some(&rest[s..])),
            (Some(_), Some(s)) => (&rest[..s], None, Some(&rest[s..])),
        };

        let (path, query) = match tail {
            Some(tail) => {
                let (path, query) = split_query(tail);
                (Some(path), query)
            }
            None => (None, None),
        };

        Self { scheme, userinfo, host: Some(host), port, path, query }
    }

    /// Resolves the default port/encryption flag from this URL's scheme,
    /// falling back to `scheme`'s table entry when no explicit port was
    /// given in the URL itself.
    pub fn resolve(&self) -> Option<(u16, bool)> {
        let scheme = parse_scheme(self.scheme?)?;
        let port = self.port.and_then(|p| p.parse().ok()).unwrap_or(scheme.port);
        Some((port, scheme.encrypted))
    }
}

fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.find('?') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    }
}

//! RFC 4516 LDAP URLs: `ldap[s]://host[:port][/dn[?attrs[?scope[?filter]]]]`.

use crate::error::{Error, Result};
use crate::protocol::SearchScope;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_LDAP_PORT: u16 = 389;
pub const DEFAULT_LDAPS_PORT: u16 = 636;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub dn: Option<String>,
    pub attributes: Vec<String>,
    pub scope: Option<SearchScope>,
    pub filter: Option<String>,
}

impl LdapUrl {
    /// `host:port` for a socket connect; IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "ldaps"
        } else {
            "ldap"
        }
    }
}

fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::Format(format!("truncated percent escape in '{}'", s)))?;
            let b = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::Format(format!("bad percent escape '%{}' in '{}'", hex, s)))?;
            out.push(b);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::Format(format!("URL component is not UTF-8: '{}'", s)))
}

impl FromStr for LdapUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("ldaps://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ldap://") {
            (false, rest)
        } else {
            return Err(Error::Format(format!("invalid LDAP URL scheme: {}", url)));
        };
        let (hostport, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let default_port = if secure { DEFAULT_LDAPS_PORT } else { DEFAULT_LDAP_PORT };

        let (host, port_str) = if let Some(v6) = hostport.strip_prefix('[') {
            let end = v6
                .find(']')
                .ok_or_else(|| Error::Format(format!("unterminated IPv6 host in {}", url)))?;
            let after = &v6[end + 1..];
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(Error::Format(format!("invalid host in {}", url))),
            };
            (&v6[..end], port)
        } else {
            match hostport.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (hostport, None),
            }
        };
        let port = match port_str {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Format(format!("invalid port in {}", url)))?,
            None => default_port,
        };
        let host = if host.is_empty() {
            "localhost".to_string()
        } else {
            percent_decode(host)?
        };

        let mut parsed = LdapUrl {
            secure,
            host,
            port,
            dn: None,
            attributes: Vec::new(),
            scope: None,
            filter: None,
        };
        let Some(path) = path else {
            return Ok(parsed);
        };
        let mut parts = path.splitn(5, '?');
        if let Some(dn) = parts.next().filter(|s| !s.is_empty()) {
            parsed.dn = Some(percent_decode(dn)?);
        }
        if let Some(attrs) = parts.next().filter(|s| !s.is_empty()) {
            parsed.attributes = attrs
                .split(',')
                .map(percent_decode)
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(scope) = parts.next().filter(|s| !s.is_empty()) {
            parsed.scope = Some(match scope.to_ascii_lowercase().as_str() {
                "base" => SearchScope::BaseObject,
                "one" => SearchScope::SingleLevel,
                "sub" => SearchScope::WholeSubtree,
                other => return Err(Error::Format(format!("invalid scope '{}' in {}", other, url))),
            });
        }
        if let Some(filter) = parts.next().filter(|s| !s.is_empty()) {
            parsed.filter = Some(percent_decode(filter)?);
        }
        // extensions are accepted and ignored
        Ok(parsed)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.address())?;
        if let Some(ref dn) = self.dn {
            write!(f, "/{}", dn)?;
        }
        Ok(())
    }
}

// Sync cookie text: `rid=<id>,csn=<time>#<count>#<sid>#<mod>`

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Change sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csn {
    pub time: String,
    pub count: String,
    pub sid: String,
    pub modification: String,
}

impl FromStr for Csn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split('#').collect();
        match fields.as_slice() {
            [time, count, sid, modification] => Ok(Csn {
                time: time.to_string(),
                count: count.to_string(),
                sid: sid.to_string(),
                modification: modification.to_string(),
            }),
            _ => Err(Error::Format(format!(
                "CSN '{}' has {} fields, expected 4",
                s,
                fields.len()
            ))),
        }
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}#{}", self.time, self.count, self.sid, self.modification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCookie {
    pub rid: String,
    pub csn: Csn,
}

impl SyncCookie {
    /// Parse the raw cookie bytes sent by the server.
    pub fn parse(cookie: &[u8]) -> Result<Self> {
        std::str::from_utf8(cookie)
            .map_err(|_| Error::Format("sync cookie is not UTF-8".to_string()))?
            .parse()
    }
}

impl FromStr for SyncCookie {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut rid = None;
        let mut csn = None;
        for pair in s.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Format(format!("sync cookie entry '{}' has no '='", pair)))?;
            match key {
                "rid" => rid = Some(value.to_string()),
                "csn" => csn = Some(value.parse::<Csn>()?),
                _ => {}
            }
        }
        match (rid, csn) {
            (Some(rid), Some(csn)) => Ok(SyncCookie { rid, csn }),
            (None, _) => Err(Error::Format(format!("sync cookie '{}' has no rid", s))),
            (_, None) => Err(Error::Format(format!("sync cookie '{}' has no csn", s))),
        }
    }
}

impl fmt::Display for SyncCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid={},csn={}", self.rid, self.csn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOKIE: &str = "rid=000,csn=20120709201319.764915Z#000000#000#000000";

    #[test]
    fn test_parse() {
        let cookie: SyncCookie = COOKIE.parse().unwrap();
        assert_eq!(cookie.rid, "000");
        assert_eq!(cookie.csn.time, "20120709201319.764915Z");
        assert_eq!(cookie.csn.count, "000000");
        assert_eq!(cookie.csn.sid, "000");
        assert_eq!(cookie.csn.modification, "000000");
        assert_eq!(cookie.to_string(), COOKIE);
        assert_eq!(SyncCookie::parse(COOKIE.as_bytes()).unwrap(), cookie);
    }

    #[test]
    fn test_missing_keys() {
        assert!(matches!("rid=000".parse::<SyncCookie>(), Err(Error::Format(_))));
        assert!(matches!(
            "csn=20120709201319.764915Z#000000#000#000000".parse::<SyncCookie>(),
            Err(Error::Format(_))
        ));
        assert!(matches!("rid000,csn=a#b#c#d".parse::<SyncCookie>(), Err(Error::Format(_))));
    }

    #[test]
    fn test_csn_field_count() {
        assert!(matches!("rid=1,csn=a#b#c".parse::<SyncCookie>(), Err(Error::Format(_))));
        assert!(matches!("rid=1,csn=a#b#c#d#e".parse::<SyncCookie>(), Err(Error::Format(_))));
    }

    #[test]
    fn test_value_split_at_first_equals() {
        let cookie: SyncCookie = "rid=a=b,sid=001,csn=t#c#s#m".parse().unwrap();
        assert_eq!(cookie.rid, "a=b");
    }
}

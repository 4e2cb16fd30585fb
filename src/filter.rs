//! RFC 4515 string filters compiled to the RFC 4511 `Filter` CHOICE.

use crate::der::encode::{ConstructedEncoder, DerEncoder, OctetStringEncoder, TaggedEncoder};
use crate::der::tag::Tag;
use crate::der::types;
use crate::error::{Error, Result};

// Filter CHOICE tags
const FILTER_AND: u32 = 0;
const FILTER_OR: u32 = 1;
const FILTER_NOT: u32 = 2;
const FILTER_EQUALITY: u32 = 3;
const FILTER_SUBSTRINGS: u32 = 4;
const FILTER_GREATER_OR_EQUAL: u32 = 5;
const FILTER_LESS_OR_EQUAL: u32 = 6;
const FILTER_PRESENT: u32 = 7;
const FILTER_APPROX: u32 = 8;
const FILTER_EXTENSIBLE: u32 = 9;

/// Deepest `&`/`|`/`!` nesting accepted.
pub const MAX_NESTING: usize = 32;

/// Compile a filter string to its BER encoding. Outer parentheses may be omitted.
pub fn compile(filter: &str) -> Result<Vec<u8>> {
    let trimmed = filter.trim();
    let wrapped;
    let text = if trimmed.starts_with('(') {
        trimmed
    } else {
        wrapped = format!("({})", trimmed);
        wrapped.as_str()
    };
    let mut parser = FilterParser {
        input: text.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let encoder = parser.parse_filter()?;
    if parser.pos != parser.input.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(encoder.encode())
}

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> FilterParser<'a> {
    fn error(&self, what: &str) -> Error {
        Error::Encode(format!(
            "bad filter '{}' at {}: {}",
            String::from_utf8_lossy(self.input),
            self.pos,
            what
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn parse_filter(&mut self) -> Result<Box<dyn DerEncoder>> {
        self.expect(b'(')?;
        if self.depth == MAX_NESTING {
            return Err(self.error(&format!("nested deeper than {}", MAX_NESTING)));
        }
        self.depth += 1;
        let encoder = self.parse_component();
        self.depth -= 1;
        let encoder = encoder?;
        self.expect(b')')?;
        Ok(encoder)
    }

    fn parse_component(&mut self) -> Result<Box<dyn DerEncoder>> {
        let encoder: Box<dyn DerEncoder> = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                self.parse_set(FILTER_AND)?
            }
            Some(b'|') => {
                self.pos += 1;
                self.parse_set(FILTER_OR)?
            }
            Some(b'!') => {
                self.pos += 1;
                let inner = self.parse_filter()?;
                Box::new(ConstructedEncoder::new(Tag::context(FILTER_NOT, true), vec![inner]))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end")),
        };
        Ok(encoder)
    }

    fn parse_set(&mut self, number: u32) -> Result<Box<dyn DerEncoder>> {
        let mut set = ConstructedEncoder::new(Tag::context(number, true), Vec::new());
        while self.peek() == Some(b'(') {
            set.push_boxed(self.parse_filter()?);
        }
        Ok(Box::new(set))
    }

    fn parse_item(&mut self) -> Result<Box<dyn DerEncoder>> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b')' => break,
                b'(' => return Err(self.error("unescaped '('")),
                _ => self.pos += 1,
            }
        }
        let item = &self.input[start..self.pos];
        let eq = item
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| self.error("missing '='"))?;
        let (lhs, value) = (&item[..eq], &item[eq + 1..]);

        let (kind, attr) = match lhs.last() {
            Some(b'~') => (Some(FILTER_APPROX), &lhs[..lhs.len() - 1]),
            Some(b'>') => (Some(FILTER_GREATER_OR_EQUAL), &lhs[..lhs.len() - 1]),
            Some(b'<') => (Some(FILTER_LESS_OR_EQUAL), &lhs[..lhs.len() - 1]),
            Some(b':') => return self.extensible(&lhs[..lhs.len() - 1], value),
            _ => (None, lhs),
        };
        let attr = self.attribute(attr)?;
        if let Some(number) = kind {
            return Ok(self.assertion(number, attr, self.unescape(value)?));
        }
        if value == b"*" {
            return Ok(Box::new(TaggedEncoder::context(FILTER_PRESENT, attr)));
        }
        if value.contains(&b'*') {
            return self.substrings(attr, value);
        }
        Ok(self.assertion(FILTER_EQUALITY, attr, self.unescape(value)?))
    }

    fn assertion(&self, number: u32, attr: &str, value: Vec<u8>) -> Box<dyn DerEncoder> {
        Box::new(ConstructedEncoder::new(
            Tag::context(number, true),
            vec![Box::new(OctetStringEncoder::from(attr)), Box::new(OctetStringEncoder::new(value))],
        ))
    }

    fn substrings(&self, attr: &str, value: &[u8]) -> Result<Box<dyn DerEncoder>> {
        let parts: Vec<&[u8]> = value.split(|&b| b == b'*').collect();
        let last = parts.len() - 1;
        let mut subs = ConstructedEncoder::sequence(Vec::new());
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                if i != 0 && i != last {
                    return Err(self.error("empty substring between '*'"));
                }
                continue;
            }
            // initial [0], any [1], final [2]
            let choice = if i == 0 {
                0
            } else if i == last {
                2
            } else {
                1
            };
            subs.push(TaggedEncoder::context(choice, self.unescape(part)?));
        }
        Ok(Box::new(ConstructedEncoder::new(
            Tag::context(FILTER_SUBSTRINGS, true),
            vec![Box::new(OctetStringEncoder::from(attr)), Box::new(subs)],
        )))
    }

    /// `attr[:dn][:rule]:=value`; either the attribute or the rule must be present.
    fn extensible(&self, lhs: &[u8], value: &[u8]) -> Result<Box<dyn DerEncoder>> {
        let text = std::str::from_utf8(lhs).map_err(|_| self.error("non-UTF-8 attribute"))?;
        let mut parts = text.split(':');
        let attr = parts.next().unwrap_or("");
        let mut dn_attributes = false;
        let mut rule = None;
        for part in parts {
            if part.eq_ignore_ascii_case("dn") && !dn_attributes {
                dn_attributes = true;
            } else if rule.is_none() && !part.is_empty() {
                rule = Some(part);
            } else {
                return Err(self.error("malformed extensible match"));
            }
        }
        if attr.is_empty() && rule.is_none() {
            return Err(self.error("extensible match needs an attribute or a matching rule"));
        }
        let mut seq = ConstructedEncoder::new(Tag::context(FILTER_EXTENSIBLE, true), Vec::new());
        if let Some(rule) = rule {
            seq.push(TaggedEncoder::context(1, rule.as_bytes()));
        }
        if !attr.is_empty() {
            seq.push(TaggedEncoder::context(2, self.attribute(attr.as_bytes())?.as_bytes()));
        }
        seq.push(TaggedEncoder::context(3, self.unescape(value)?));
        if dn_attributes {
            seq.push(TaggedEncoder::context(4, types::encode_boolean(true)));
        }
        Ok(Box::new(seq))
    }

    fn attribute<'b>(&self, attr: &'b [u8]) -> Result<&'b str> {
        let valid = !attr.is_empty()
            && attr
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b';' | b'.' | b'_'));
        if !valid {
            return Err(self.error("invalid attribute description"));
        }
        std::str::from_utf8(attr).map_err(|_| self.error("invalid attribute description"))
    }

    /// Resolve `\xx` hex escapes.
    fn unescape(&self, value: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(value.len());
        let mut i = 0;
        while i < value.len() {
            if value[i] == b'\\' {
                let hex = value.get(i + 1..i + 3).ok_or_else(|| self.error("truncated escape"))?;
                let hex = std::str::from_utf8(hex).map_err(|_| self.error("bad escape"))?;
                out.push(u8::from_str_radix(hex, 16).map_err(|_| self.error("bad escape"))?);
                i += 3;
            } else {
                out.push(value[i]);
                i += 1;
            }
        }
        Ok(out)
    }
}

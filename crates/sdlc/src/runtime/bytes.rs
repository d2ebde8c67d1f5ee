//! The `Bytes` value type.
//!
//! An immutable-appearing byte sequence with the operations generated parsers
//! and user code rely on. Case transformations and predicates operate on
//! ASCII bytes only; `decode` converts to text under an explicit charset.
//!
//! # Implemented Methods
//!
//! ## Inspection
//! - `size()` - Number of bytes
//! - `starts_with(prefix)` - Prefix check
//! - `find(needle)` - First occurrence
//! - `sub(begin, end)` - Subrange copy
//!
//! ## Transformations
//! - `lower()` / `upper()` - ASCII case mapping
//! - `strip(side, set?)` - Trim bytes from either or both ends
//! - `split(sep?)` / `split1(sep?)` - Split on separator or whitespace
//! - `join(parts)` - Join with `self` as separator
//!
//! ## Conversions
//! - `decode(charset, errors)` - To text (UTF-8, ASCII, Latin-1)
//! - `to_int(base)` / `to_uint(base)` - Text-to-integer
//! - `to_int_binary(order)` / `to_uint_binary(order)` - Binary decode
//! - `to_time(base)` / `to_time_binary(order)` - Seconds-since-epoch decode

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::{
    error::{ErrorKind, RtResult, RuntimeError},
    integer::{ByteOrder, UInt, Width},
    regexp::RegExp,
    time::Time,
};

/// Character sets supported by `Bytes::decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

/// Error handling strategy for `Bytes::decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrors {
    /// Raise `InvalidValue` on the first offending byte.
    #[default]
    Strict,
    /// Substitute U+FFFD for offending bytes.
    Replace,
    /// Drop offending bytes.
    Ignore,
}

/// Which end(s) `strip` trims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    Left,
    Right,
    #[default]
    Both,
}

/// A byte sequence value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn size(&self) -> u64 {
        self.0.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Copies the subrange `[begin, end)`, clamping both bounds to the size.
    pub fn sub(&self, begin: u64, end: u64) -> Self {
        let len = self.0.len();
        let b = usize::try_from(begin).unwrap_or(len).min(len);
        let e = usize::try_from(end).unwrap_or(len).min(len).max(b);
        Self(self.0[b..e].to_vec())
    }

    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns the offset of the first occurrence of `needle`, if any.
    /// An empty needle matches at offset 0.
    pub fn find(&self, needle: &Self) -> Option<u64> {
        find_sub(&self.0, &needle.0).map(|i| i as u64)
    }

    pub fn lower(&self) -> Self {
        Self(self.0.iter().map(u8::to_ascii_lowercase).collect())
    }

    pub fn upper(&self) -> Self {
        Self(self.0.iter().map(u8::to_ascii_uppercase).collect())
    }

    /// Splits on `sep`, or on runs of ASCII whitespace when `sep` is `None`.
    ///
    /// With an explicit separator, adjacent separators produce empty parts;
    /// whitespace splitting never produces empty parts.
    pub fn split(&self, sep: Option<&Self>) -> Vec<Self> {
        match sep {
            Some(sep) if !sep.is_empty() => {
                let mut parts = Vec::new();
                let mut rest: &[u8] = &self.0;
                while let Some(i) = find_sub(rest, &sep.0) {
                    parts.push(Self(rest[..i].to_vec()));
                    rest = &rest[i + sep.0.len()..];
                }
                parts.push(Self(rest.to_vec()));
                parts
            }
            _ => self
                .0
                .split(|b| b.is_ascii_whitespace())
                .filter(|p| !p.is_empty())
                .map(|p| Self(p.to_vec()))
                .collect(),
        }
    }

    /// Splits at the first occurrence of `sep` only, returning `(head, tail)`.
    /// Without a match the head is the full value and the tail is empty.
    pub fn split1(&self, sep: Option<&Self>) -> (Self, Self) {
        match sep {
            Some(sep) if !sep.is_empty() => match find_sub(&self.0, &sep.0) {
                Some(i) => (Self(self.0[..i].to_vec()), Self(self.0[i + sep.0.len()..].to_vec())),
                None => (self.clone(), Self::empty()),
            },
            _ => {
                let Some(start) = self.0.iter().position(|b| b.is_ascii_whitespace()) else {
                    return (self.clone(), Self::empty());
                };
                let rest = &self.0[start..];
                let end = rest
                    .iter()
                    .position(|b| !b.is_ascii_whitespace())
                    .map_or(self.0.len(), |i| start + i);
                (Self(self.0[..start].to_vec()), Self(self.0[end..].to_vec()))
            }
        }
    }

    /// Removes bytes in `set` (ASCII whitespace when `None`) from the given side(s).
    pub fn strip(&self, side: Side, set: Option<&Self>) -> Self {
        let in_set = |b: &u8| match set {
            Some(set) => set.0.contains(b),
            None => b.is_ascii_whitespace(),
        };
        let mut begin = 0;
        let mut end = self.0.len();
        if matches!(side, Side::Left | Side::Both) {
            while begin < end && in_set(&self.0[begin]) {
                begin += 1;
            }
        }
        if matches!(side, Side::Right | Side::Both) {
            while end > begin && in_set(&self.0[end - 1]) {
                end -= 1;
            }
        }
        Self(self.0[begin..end].to_vec())
    }

    /// Joins `parts` with `self` as the separator.
    pub fn join(&self, parts: &[Self]) -> Self {
        let mut out = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&self.0);
            }
            out.extend_from_slice(&part.0);
        }
        Self(out)
    }

    /// Decodes to text under `charset` with the given error strategy.
    pub fn decode(&self, charset: Charset, errors: DecodeErrors) -> RtResult<String> {
        match charset {
            Charset::Utf8 => decode_utf8(&self.0, errors),
            Charset::Ascii => {
                let mut out = String::with_capacity(self.0.len());
                for &b in &self.0 {
                    if b < 0x80 {
                        out.push(char::from(b));
                    } else {
                        match errors {
                            DecodeErrors::Strict => {
                                return Err(RuntimeError::invalid_value(format!(
                                    "cannot decode byte {b:#04x} as ASCII"
                                )));
                            }
                            DecodeErrors::Replace => out.push('\u{fffd}'),
                            DecodeErrors::Ignore => {}
                        }
                    }
                }
                Ok(out)
            }
            Charset::Latin1 => Ok(self.0.iter().map(|&b| char::from(b)).collect()),
        }
    }

    /// Encodes text back to bytes under `charset`.
    pub fn encode(text: &str, charset: Charset) -> RtResult<Self> {
        match charset {
            Charset::Utf8 => Ok(Self(text.as_bytes().to_vec())),
            Charset::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(RuntimeError::invalid_value(format!("cannot encode {c:?} as ASCII")));
                }
                Ok(Self(text.as_bytes().to_vec()))
            }
            Charset::Latin1 => {
                let mut out = Vec::with_capacity(text.len());
                for c in text.chars() {
                    let cp = u32::from(c);
                    if cp > 0xff {
                        return Err(RuntimeError::invalid_value(format!("cannot encode {c:?} as Latin-1")));
                    }
                    out.push(cp as u8);
                }
                Ok(Self(out))
            }
        }
    }

    /// Parses the textual content as a signed integer in the given base (2-36).
    pub fn to_int(&self, base: u32) -> RtResult<i64> {
        let text = self.decode(Charset::Ascii, DecodeErrors::Strict)?;
        let text = text.trim();
        if !(2..=36).contains(&base) {
            return Err(RuntimeError::invalid_argument(format!("unsupported base {base}")));
        }
        i64::from_str_radix(text, base)
            .map_err(|_| RuntimeError::invalid_value(format!("cannot parse {text:?} as integer")))
    }

    /// Parses the textual content as an unsigned integer in the given base (2-36).
    pub fn to_uint(&self, base: u32) -> RtResult<u64> {
        let text = self.decode(Charset::Ascii, DecodeErrors::Strict)?;
        let text = text.trim();
        if !(2..=36).contains(&base) {
            return Err(RuntimeError::invalid_argument(format!("unsupported base {base}")));
        }
        u64::from_str_radix(text, base)
            .map_err(|_| RuntimeError::invalid_value(format!("cannot parse {text:?} as unsigned integer")))
    }

    /// Interprets the raw bytes (at most 8) as a signed integer in `order`.
    pub fn to_int_binary(&self, order: ByteOrder) -> RtResult<i64> {
        let width = binary_width(self.0.len())?;
        let (v, _) = crate::runtime::integer::SInt::unpack(&self.0, width, order)?;
        Ok(v.value())
    }

    /// Interprets the raw bytes (at most 8) as an unsigned integer in `order`.
    pub fn to_uint_binary(&self, order: ByteOrder) -> RtResult<u64> {
        let width = binary_width(self.0.len())?;
        let (v, _) = UInt::unpack(&self.0, width, order)?;
        Ok(v.value())
    }

    /// Parses the textual content as seconds since the epoch.
    pub fn to_time(&self, base: u32) -> RtResult<Time> {
        let secs = self.to_uint(base)?;
        Time::from_seconds(secs)
    }

    /// Interprets the raw bytes as seconds since the epoch in `order`.
    pub fn to_time_binary(&self, order: ByteOrder) -> RtResult<Time> {
        let secs = self.to_uint_binary(order)?;
        Time::from_seconds(secs)
    }

    /// Matches `re` against the value, returning capture group `group`
    /// (0 = the whole match) or `None` on no match.
    pub fn match_(&self, re: &RegExp, group: usize) -> RtResult<Option<Self>> {
        re.match_group(self, group)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl From<&str> for Bytes {
    fn from(data: &str) -> Self {
        Self(data.as_bytes().to_vec())
    }
}

impl fmt::Display for Bytes {
    /// Renders with non-printable bytes escaped as `\xNN`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", char::from(b))?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Naive substring search; needles here are short delimiters.
pub(crate) fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn binary_width(len: usize) -> RtResult<Width> {
    match len {
        1 => Ok(Width::W8),
        2 => Ok(Width::W16),
        4 => Ok(Width::W32),
        8 => Ok(Width::W64),
        n => Err(RuntimeError::new(
            ErrorKind::InvalidArgument,
            format!("cannot interpret {n} bytes as an integer"),
        )),
    }
}

fn decode_utf8(data: &[u8], errors: DecodeErrors) -> RtResult<String> {
    match std::str::from_utf8(data) {
        Ok(s) => Ok(s.to_owned()),
        Err(_) if errors == DecodeErrors::Strict => {
            Err(RuntimeError::invalid_value("cannot decode bytes as UTF-8"))
        }
        Err(_) => {
            let mut out = String::new();
            let mut rest = data;
            loop {
                match std::str::from_utf8(rest) {
                    Ok(s) => {
                        out.push_str(s);
                        break;
                    }
                    Err(e) => {
                        let valid = e.valid_up_to();
                        out.push_str(std::str::from_utf8(&rest[..valid]).expect("prefix validated"));
                        if errors == DecodeErrors::Replace {
                            out.push('\u{fffd}');
                        }
                        let skip = e.error_len().unwrap_or(rest.len() - valid);
                        rest = &rest[valid + skip..];
                        if rest.is_empty() {
                            break;
                        }
                    }
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_clamps_bounds() {
        let b = Bytes::from("hello");
        assert_eq!(b.sub(1, 3), Bytes::from("el"));
        assert_eq!(b.sub(3, 100), Bytes::from("lo"));
        assert_eq!(b.sub(4, 2), Bytes::empty());
    }

    #[test]
    fn find_empty_needle_matches_at_zero() {
        assert_eq!(Bytes::from("abc").find(&Bytes::empty()), Some(0));
        assert_eq!(Bytes::from("abcabc").find(&Bytes::from("ca")), Some(2));
        assert_eq!(Bytes::from("abc").find(&Bytes::from("x")), None);
    }

    #[test]
    fn split_with_separator_keeps_empty_parts() {
        let b = Bytes::from("a,,b");
        let parts = b.split(Some(&Bytes::from(",")));
        assert_eq!(parts, vec![Bytes::from("a"), Bytes::empty(), Bytes::from("b")]);
    }

    #[test]
    fn split_on_whitespace_drops_empty_parts() {
        let b = Bytes::from("  a \t b  ");
        assert_eq!(b.split(None), vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[test]
    fn split1_on_whitespace_swallows_the_run() {
        let (head, tail) = Bytes::from("GET  /index").split1(None);
        assert_eq!(head, Bytes::from("GET"));
        assert_eq!(tail, Bytes::from("/index"));
    }

    #[test]
    fn strip_sides() {
        let b = Bytes::from("  x  ");
        assert_eq!(b.strip(Side::Left, None), Bytes::from("x  "));
        assert_eq!(b.strip(Side::Right, None), Bytes::from("  x"));
        assert_eq!(b.strip(Side::Both, None), Bytes::from("x"));
        assert_eq!(Bytes::from("xxaxx").strip(Side::Both, Some(&Bytes::from("x"))), Bytes::from("a"));
    }

    #[test]
    fn join_inserts_separator_between_parts() {
        let sep = Bytes::from(", ");
        assert_eq!(
            sep.join(&[Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]),
            Bytes::from("a, b, c")
        );
        assert_eq!(sep.join(&[]), Bytes::empty());
    }

    #[test]
    fn decode_ascii_strict_rejects_high_bytes() {
        let b = Bytes::new(vec![b'a', 0xff]);
        assert!(b.decode(Charset::Ascii, DecodeErrors::Strict).is_err());
        assert_eq!(b.decode(Charset::Ascii, DecodeErrors::Replace).unwrap(), "a\u{fffd}");
        assert_eq!(b.decode(Charset::Ascii, DecodeErrors::Ignore).unwrap(), "a");
    }

    #[test]
    fn utf8_decode_encode_round_trip() {
        let s = "héllo wörld ✓";
        let b = Bytes::encode(s, Charset::Utf8).unwrap();
        assert_eq!(b.decode(Charset::Utf8, DecodeErrors::Strict).unwrap(), s);
        assert_eq!(Bytes::encode(&b.decode(Charset::Utf8, DecodeErrors::Strict).unwrap(), Charset::Utf8).unwrap(), b);
    }

    #[test]
    fn to_int_parses_bases() {
        assert_eq!(Bytes::from("-42").to_int(10).unwrap(), -42);
        assert_eq!(Bytes::from("ff").to_uint(16).unwrap(), 255);
        assert!(Bytes::from("12x").to_int(10).is_err());
    }

    #[test]
    fn binary_conversion_respects_byte_order() {
        let b = Bytes::new(vec![0x01, 0x02]);
        assert_eq!(b.to_uint_binary(ByteOrder::Big).unwrap(), 0x0102);
        assert_eq!(b.to_uint_binary(ByteOrder::Little).unwrap(), 0x0201);
        let neg = Bytes::new(vec![0xff]);
        assert_eq!(neg.to_int_binary(ByteOrder::Big).unwrap(), -1);
    }

    #[test]
    fn display_escapes_non_printable() {
        assert_eq!(Bytes::new(vec![b'a', 0, b'b']).to_string(), "a\\x00b");
    }
}

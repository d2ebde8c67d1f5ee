//! Regular-expression matching over bytes, including streamed token matching.
//!
//! `RegExp` wraps a compiled set of patterns, each carrying an accept ID.
//! Two operational modes exist: the minimal matcher tracks no capture
//! groups and is used unless capture support is explicitly requested; the
//! standard matcher retains group positions for extraction after a match.
//!
//! `MatchState` drives anchored matching incrementally across input chunks.
//! `advance` returns `(accept_id, consumed)` where the accept ID is positive
//! on a concluded match, `0` on a definite no-match, and negative when more
//! data is required to decide. A match concludes once the input extends past
//! its end (the token is maximal against the bytes seen) or the input is
//! final. Feeding a concluded state raises `MatchStateReuse`.

use std::sync::Arc;

use crate::runtime::{
    bytes::Bytes,
    error::{ErrorKind, RtResult, RuntimeError},
};

/// Compilation flags for `RegExp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegExpFlags {
    /// Compile without capture-group support (the minimal matcher).
    pub no_sub: bool,
}

#[derive(Debug)]
struct Pattern {
    id: i32,
    source: String,
    /// The pattern compiled with an implicit start anchor.
    anchored: regex::bytes::Regex,
}

#[derive(Debug)]
struct Inner {
    patterns: Vec<Pattern>,
    flags: RegExpFlags,
}

/// A compiled set of patterns with accept IDs.
#[derive(Debug, Clone)]
pub struct RegExp {
    inner: Arc<Inner>,
}

impl RegExp {
    /// Compiles `patterns` with accept IDs 1, 2, … in order.
    pub fn new<S: AsRef<str>>(patterns: &[S], flags: RegExpFlags) -> RtResult<Self> {
        let with_ids = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (p.as_ref().to_owned(), i as i32 + 1))
            .collect();
        Self::with_ids(with_ids, flags)
    }

    /// Compiles `patterns`, each with an explicit accept ID (must be positive).
    pub fn with_ids(patterns: Vec<(String, i32)>, flags: RegExpFlags) -> RtResult<Self> {
        if patterns.is_empty() {
            return Err(RuntimeError::pattern_error("empty pattern set"));
        }
        let mut compiled = Vec::with_capacity(patterns.len());
        for (source, id) in patterns {
            if id <= 0 {
                return Err(RuntimeError::pattern_error(format!("accept ID {id} must be positive")));
            }
            let anchored = regex::bytes::Regex::new(&format!("^(?s:{source})"))
                .map_err(|e| RuntimeError::pattern_error(format!("cannot compile pattern /{source}/: {e}")))?;
            compiled.push(Pattern { id, source, anchored });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                patterns: compiled,
                flags,
            }),
        })
    }

    /// True when the standard (capture-carrying) matcher is in use.
    pub fn has_captures(&self) -> bool {
        !self.inner.flags.no_sub
    }

    pub fn pattern_sources(&self) -> impl Iterator<Item = &str> {
        self.inner.patterns.iter().map(|p| p.source.as_str())
    }

    /// Creates a fresh streaming match state.
    pub fn token_matcher(&self) -> MatchState {
        MatchState {
            re: self.clone(),
            buffer: Vec::new(),
            done: false,
            accepted: None,
        }
    }

    /// Anchored match against complete data, returning the capture group
    /// `group` (0 is the whole match) or `None` when nothing matches.
    pub fn match_group(&self, data: &Bytes, group: usize) -> RtResult<Option<Bytes>> {
        if group > 0 && !self.has_captures() {
            return Err(RuntimeError::pattern_error(
                "capture groups not available on a no-capture pattern",
            ));
        }
        for pattern in &self.inner.patterns {
            if let Some(caps) = pattern.anchored.captures(data.as_slice()) {
                return Ok(caps.get(group).map(|m| Bytes::from(m.as_bytes())));
            }
        }
        Ok(None)
    }

    /// Best anchored match over `data`: leftmost-longest across the set,
    /// lowest accept ID breaking ties. Returns `(id, length)`.
    fn best_match(&self, data: &[u8]) -> Option<(i32, usize)> {
        let mut best: Option<(i32, usize)> = None;
        for pattern in &self.inner.patterns {
            if let Some(m) = pattern.anchored.find(data) {
                let candidate = (pattern.id, m.end());
                best = Some(match best {
                    Some(b) if b.1 >= candidate.1 => b,
                    _ => candidate,
                });
            }
        }
        best
    }
}

/// Result of a decided streaming match: accept ID and consumed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Accepted {
    id: i32,
    consumed: usize,
}

/// Progress of an anchored match across input chunks.
///
/// A match state is movable but a state carrying capture buffers is not
/// clonable: `try_clone` fails for states derived from capture-group
/// patterns.
#[derive(Debug)]
pub struct MatchState {
    re: RegExp,
    buffer: Vec<u8>,
    done: bool,
    accepted: Option<Accepted>,
}

impl MatchState {
    /// Feeds the next chunk and attempts to decide the match.
    ///
    /// Returns `(accept_id, consumed)`: positive ID and total consumed bytes
    /// on a concluded match, `(0, 0)` on a definite no-match, `(-1, 0)` when
    /// more input is needed. `is_final` marks the last chunk (frozen input).
    pub fn advance(&mut self, data: &[u8], is_final: bool) -> RtResult<(i32, u64)> {
        if self.done {
            return Err(RuntimeError::new(
                ErrorKind::MatchStateReuse,
                "match state has already concluded",
            ));
        }
        self.buffer.extend_from_slice(data);

        match self.re.best_match(&self.buffer) {
            Some((id, len)) if is_final || len < self.buffer.len() => {
                // Maximal against the bytes seen: nothing after the match end
                // extended it, or no more input is coming.
                self.done = true;
                self.accepted = Some(Accepted { id, consumed: len });
                Ok((id, len as u64))
            }
            None if is_final => {
                self.done = true;
                Ok((0, 0))
            }
            _ => Ok((-1, 0)),
        }
    }

    /// Extracts capture groups of the concluded match. Requires the standard
    /// matcher and a successful conclusion.
    pub fn captures(&self) -> RtResult<Vec<Bytes>> {
        if !self.re.has_captures() {
            return Err(RuntimeError::pattern_error(
                "capture groups not available on a no-capture pattern",
            ));
        }
        let Some(accepted) = self.accepted else {
            return Err(RuntimeError::pattern_error("no concluded match to extract captures from"));
        };
        let matched = &self.buffer[..accepted.consumed];
        for pattern in &self.re.inner.patterns {
            if pattern.id != accepted.id {
                continue;
            }
            if let Some(caps) = pattern.anchored.captures(matched) {
                let mut out = Vec::with_capacity(caps.len());
                for group in caps.iter() {
                    out.push(group.map_or_else(Bytes::empty, |m| Bytes::from(m.as_bytes())));
                }
                return Ok(out);
            }
        }
        Err(RuntimeError::pattern_error("concluded match no longer reproducible"))
    }

    /// Duplicates the state. Fails for states of capture-group patterns,
    /// which own capture buffers and are only movable.
    pub fn try_clone(&self) -> RtResult<Self> {
        if self.re.has_captures() {
            return Err(RuntimeError::pattern_error(
                "cannot copy match state of a regexp with capture groups",
            ));
        }
        Ok(Self {
            re: self.re.clone(),
            buffer: self.buffer.clone(),
            done: self.done,
            accepted: self.accepted,
        })
    }
}

/// Convenience for codegen'd literal tables: compiles several alternatives
/// into one set, preserving the given accept IDs.
pub fn compile_token_set(tokens: &[(&str, i32)]) -> RtResult<RegExp> {
    let patterns: Vec<(String, i32)> = tokens.iter().map(|(s, id)| ((*s).to_owned(), *id)).collect();
    RegExp::with_ids(patterns, RegExpFlags { no_sub: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pattern: &str, no_sub: bool) -> MatchState {
        RegExp::new(&[pattern], RegExpFlags { no_sub }).unwrap().token_matcher()
    }

    #[test]
    fn match_decided_by_following_byte() {
        let mut m = state("ab+", true);
        assert_eq!(m.advance(b"ab", false).unwrap(), (-1, 0));
        assert_eq!(m.advance(b"bc", false).unwrap(), (1, 3));
    }

    #[test]
    fn match_decided_at_final_chunk() {
        let mut m = state("ab+", true);
        assert_eq!(m.advance(b"abb", false).unwrap(), (-1, 0));
        assert_eq!(m.advance(b"", true).unwrap(), (1, 3));
    }

    #[test]
    fn definite_no_match_only_when_final() {
        let mut m = state("foo", true);
        assert_eq!(m.advance(b"f", false).unwrap(), (-1, 0));
        assert_eq!(m.advance(b"x", true).unwrap(), (0, 0));
    }

    #[test]
    fn concluded_state_rejects_more_data() {
        let mut m = state("a", true);
        assert_eq!(m.advance(b"ab", false).unwrap(), (1, 1));
        let err = m.advance(b"c", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MatchStateReuse);
    }

    #[test]
    fn accept_ids_pick_longest_then_lowest() {
        let re = compile_token_set(&[("GET", 10), ("G", 20)]).unwrap();
        let mut m = re.token_matcher();
        assert_eq!(m.advance(b"GET ", false).unwrap(), (10, 3));
    }

    #[test]
    fn capture_state_is_not_clonable() {
        let with_caps = state("(a)(b)", false);
        assert_eq!(with_caps.try_clone().unwrap_err().kind, ErrorKind::PatternError);
        let without = state("ab", true);
        assert!(without.try_clone().is_ok());
    }

    #[test]
    fn captures_extracted_after_conclusion() {
        let mut m = state("(a+)(b+)", false);
        assert_eq!(m.advance(b"aabbc", false).unwrap(), (1, 4));
        let caps = m.captures().unwrap();
        assert_eq!(caps[0], Bytes::from("aabb"));
        assert_eq!(caps[1], Bytes::from("aa"));
        assert_eq!(caps[2], Bytes::from("bb"));
    }

    #[test]
    fn match_group_on_complete_bytes() {
        let re = RegExp::new(&["(h.)llo"], RegExpFlags::default()).unwrap();
        let got = re.match_group(&Bytes::from("hello world"), 1).unwrap();
        assert_eq!(got, Some(Bytes::from("he")));
        assert_eq!(re.match_group(&Bytes::from("nope"), 0).unwrap(), None);
    }

    #[test]
    fn bad_pattern_reports_pattern_error() {
        let err = RegExp::new(&["("], RegExpFlags::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PatternError);
    }
}

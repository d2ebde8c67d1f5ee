//! Chunked input streams, views, and iterators.
//!
//! A `Stream` is an append-only sequence of byte chunks with a freeze flag;
//! appended bytes never move, so offsets are stable for the stream's
//! lifetime. Parsers work through `View`s: offset windows that either extend
//! automatically as the stream grows (open-ended) or stop at a fixed end
//! (trimmed). A `StreamIter` is an absolute offset used for random-access
//! positions.
//!
//! Views and iterators do not borrow the stream; operations take the stream
//! explicitly. The sink owns each connected sub-parser's stream, and the
//! fiber receives it on every resume.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

use crate::runtime::{
    bytes::{find_sub, Bytes},
    error::{RtResult, RuntimeError},
    fiber,
};

/// Search direction for `View::find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    offset: u64,
    data: Vec<u8>,
}

impl Chunk {
    fn upper(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Append-only chunked byte stream with a freeze flag.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Stream {
    chunks: VecDeque<Chunk>,
    /// Logical offset of the first retained byte.
    begin: u64,
    /// Logical offset one past the last appended byte.
    end: u64,
    frozen: bool,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes as a new chunk. Appending to a frozen stream is an error;
    /// appending nothing is a no-op.
    pub fn append(&mut self, data: impl Into<Vec<u8>>) -> RtResult<()> {
        let data: Vec<u8> = data.into();
        if data.is_empty() {
            return Ok(());
        }
        if self.frozen {
            return Err(RuntimeError::invalid_argument("cannot append to frozen stream"));
        }
        fiber::stats::on_stream_alloc(data.len());
        self.chunks.push_back(Chunk { offset: self.end, data });
        self.end = self.chunks.back().expect("just pushed").upper();
        Ok(())
    }

    /// Marks end-of-data. Waits on this stream now conclude instead of
    /// suspending.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Offset of the first retained byte.
    pub fn begin_offset(&self) -> u64 {
        self.begin
    }

    /// Offset one past the last appended byte.
    pub fn end_offset(&self) -> u64 {
        self.end
    }

    /// Number of retained bytes.
    pub fn size(&self) -> u64 {
        self.end - self.begin
    }

    /// Releases bytes before `offset`. Whole chunks only: a chunk is dropped
    /// once its upper end is at or below the trim point, so a partially
    /// consumed chunk stays resident until fully consumed.
    pub fn trim(&mut self, offset: u64) {
        while let Some(front) = self.chunks.front() {
            if front.upper() <= offset {
                fiber::stats::on_stream_free(front.data.len());
                self.chunks.pop_front();
            } else {
                break;
            }
        }
        self.begin = self.begin.max(offset.min(self.end));
    }

    /// An open-ended view over everything retained and still to come.
    pub fn view(&self) -> View {
        View {
            begin: self.begin,
            end: None,
        }
    }

    /// An iterator at an absolute offset.
    pub fn at(&self, offset: u64) -> StreamIter {
        StreamIter { offset }
    }

    /// Copies the bytes in `[begin, end)`, clamped to what is retained.
    pub fn copy_range(&self, begin: u64, end: u64) -> Bytes {
        let begin = begin.max(self.begin);
        let end = end.min(self.end);
        if begin >= end {
            return Bytes::empty();
        }
        let mut out = Vec::with_capacity(usize::try_from(end - begin).unwrap_or(0));
        for chunk in &self.chunks {
            if chunk.upper() <= begin {
                continue;
            }
            if chunk.offset >= end {
                break;
            }
            let from = begin.saturating_sub(chunk.offset) as usize;
            let to = ((end - chunk.offset) as usize).min(chunk.data.len());
            out.extend_from_slice(&chunk.data[from..to]);
        }
        Bytes::new(out)
    }

    /// Calls `f` on each retained chunk slice overlapping `[begin, end)`,
    /// stopping early when `f` returns `false`. Zero-copy scanning path.
    pub fn for_each_chunk(&self, begin: u64, end: u64, mut f: impl FnMut(u64, &[u8]) -> bool) {
        for chunk in &self.chunks {
            if chunk.upper() <= begin {
                continue;
            }
            if chunk.offset >= end {
                break;
            }
            let from = begin.saturating_sub(chunk.offset) as usize;
            let to = ((end.min(chunk.upper()) - chunk.offset) as usize).min(chunk.data.len());
            if !f(chunk.offset + from as u64, &chunk.data[from..to]) {
                break;
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            fiber::stats::on_stream_free(chunk.data.len());
        }
        self.chunks.clear();
    }
}

/// A window into a stream.
///
/// `end == None` marks an open-ended view that extends as the stream grows;
/// a trimmed view has a fixed end and never sees bytes past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    begin: u64,
    end: Option<u64>,
}

impl View {
    pub fn open(begin: u64) -> Self {
        Self { begin, end: None }
    }

    pub fn trimmed(begin: u64, end: u64) -> Self {
        Self { begin, end: Some(end) }
    }

    pub fn begin(self) -> u64 {
        self.begin
    }

    pub fn end_bound(self) -> Option<u64> {
        self.end
    }

    /// Upper offset currently visible: the trimmed end, or the stream's end.
    pub fn upper(self, stream: &Stream) -> u64 {
        match self.end {
            Some(end) => end.min(stream.end_offset()).max(self.begin),
            None => stream.end_offset().max(self.begin),
        }
    }

    /// Bytes currently available in the view.
    pub fn len(self, stream: &Stream) -> u64 {
        self.upper(stream) - self.begin
    }

    pub fn is_empty(self, stream: &Stream) -> bool {
        self.len(stream) == 0
    }

    /// True once no further input can appear: the view ends at a fixed
    /// offset already reached, or the stream is frozen.
    pub fn at_eod(self, stream: &Stream) -> bool {
        match self.end {
            Some(end) => stream.end_offset() >= end || stream.is_frozen(),
            None => stream.is_frozen(),
        }
    }

    /// Copies all currently available bytes.
    pub fn data(self, stream: &Stream) -> Bytes {
        stream.copy_range(self.begin, self.upper(stream))
    }

    /// Copies the first `n` available bytes, or `None` if fewer are present.
    pub fn read(self, stream: &Stream, n: u64) -> Option<Bytes> {
        if self.len(stream) < n {
            return None;
        }
        Some(stream.copy_range(self.begin, self.begin + n))
    }

    pub fn starts_with(self, stream: &Stream, needle: &Bytes) -> bool {
        if self.len(stream) < needle.size() {
            return false;
        }
        stream.copy_range(self.begin, self.begin + needle.size()).as_slice() == needle.as_slice()
    }

    /// Full search over the available bytes.
    ///
    /// Forward: searches `[start.unwrap_or(begin), upper)` and returns the
    /// absolute offset of the first match. Backward: `start` means
    /// one-past-end; searches `[begin, start.unwrap_or(upper))` and returns
    /// the absolute offset of the last match.
    pub fn find(self, stream: &Stream, needle: &Bytes, direction: SearchDirection, start: Option<u64>) -> Option<u64> {
        let upper = self.upper(stream);
        let (from, to) = match direction {
            SearchDirection::Forward => (start.unwrap_or(self.begin).max(self.begin), upper),
            SearchDirection::Backward => (self.begin, start.unwrap_or(upper).min(upper)),
        };
        if from >= to {
            return None;
        }
        let data = stream.copy_range(from, to);
        match direction {
            SearchDirection::Forward => find_sub(data.as_slice(), needle.as_slice()).map(|i| from + i as u64),
            SearchDirection::Backward => {
                if needle.is_empty() {
                    return Some(to);
                }
                let slice = data.as_slice();
                let nlen = needle.size() as usize;
                if slice.len() < nlen {
                    return None;
                }
                (0..=slice.len() - nlen)
                    .rev()
                    .find(|&i| &slice[i..i + nlen] == needle.as_slice())
                    .map(|i| from + i as u64)
            }
        }
    }

    /// Advances the view's begin by `n` bytes.
    #[must_use]
    pub fn advance(self, n: u64) -> Self {
        Self {
            begin: self.begin + n,
            end: self.end,
        }
    }

    /// Moves the view's begin to an absolute offset.
    #[must_use]
    pub fn advance_to(self, offset: u64) -> Self {
        Self {
            begin: offset.max(self.begin),
            end: self.end,
        }
    }

    /// A trimmed sub-view of at most `n` bytes from the current begin.
    /// Re-limiting never extends an existing bound.
    #[must_use]
    pub fn limit(self, n: u64) -> Self {
        let end = self.begin + n;
        Self {
            begin: self.begin,
            end: Some(self.end.map_or(end, |e| e.min(end))),
        }
    }

    /// An iterator at the view's begin.
    pub fn begin_iter(self) -> StreamIter {
        StreamIter { offset: self.begin }
    }

    /// True if `iter` lies inside the view's range.
    pub fn contains(self, stream: &Stream, iter: StreamIter) -> bool {
        iter.offset >= self.begin && iter.offset <= self.upper(stream)
    }
}

/// Absolute position in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIter {
    offset: u64,
}

impl StreamIter {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(self) -> u64 {
        self.offset
    }
}

impl fmt::Display for StreamIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<iter @{}>", self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with(parts: &[&str]) -> Stream {
        let mut s = Stream::new();
        for p in parts {
            s.append(p.as_bytes().to_vec()).unwrap();
        }
        s
    }

    #[test]
    fn append_and_offsets() {
        let s = stream_with(&["abc", "de"]);
        assert_eq!(s.begin_offset(), 0);
        assert_eq!(s.end_offset(), 5);
        assert_eq!(s.size(), 5);
    }

    #[test]
    fn append_to_frozen_fails() {
        let mut s = stream_with(&["x"]);
        s.freeze();
        assert!(s.append(b"y".to_vec()).is_err());
    }

    #[test]
    fn copy_range_spans_chunks() {
        let s = stream_with(&["abc", "def", "gh"]);
        assert_eq!(s.copy_range(2, 7), Bytes::from("cdefg"));
        assert_eq!(s.copy_range(0, 100), Bytes::from("abcdefgh"));
    }

    #[test]
    fn trim_releases_whole_chunks() {
        let mut s = stream_with(&["abc", "def"]);
        s.trim(4);
        assert_eq!(s.begin_offset(), 4);
        // "abc" released, "def" retained because it is only partially consumed.
        assert_eq!(s.copy_range(4, 6), Bytes::from("ef"));
    }

    #[test]
    fn open_view_extends_with_stream() {
        let mut s = stream_with(&["ab"]);
        let v = s.view();
        assert_eq!(v.len(&s), 2);
        s.append(b"cd".to_vec()).unwrap();
        assert_eq!(v.len(&s), 4);
        assert_eq!(v.data(&s), Bytes::from("abcd"));
    }

    #[test]
    fn trimmed_view_is_fixed() {
        let mut s = stream_with(&["abcdef"]);
        let v = s.view().limit(3);
        s.append(b"gh".to_vec()).unwrap();
        assert_eq!(v.len(&s), 3);
        assert_eq!(v.data(&s), Bytes::from("abc"));
        assert!(v.at_eod(&s));
    }

    #[test]
    fn limit_never_extends() {
        let s = stream_with(&["abcdef"]);
        let v = s.view().limit(3).limit(10);
        assert_eq!(v.len(&s), 3);
    }

    #[test]
    fn advance_and_read() {
        let s = stream_with(&["hello"]);
        let v = s.view().advance(2);
        assert_eq!(v.read(&s, 3).unwrap(), Bytes::from("llo"));
        assert_eq!(v.read(&s, 4), None);
    }

    #[test]
    fn find_forward_and_backward() {
        let s = stream_with(&["one", "two", "one"]);
        let v = s.view();
        let needle = Bytes::from("one");
        assert_eq!(v.find(&s, &needle, SearchDirection::Forward, None), Some(0));
        assert_eq!(v.find(&s, &needle, SearchDirection::Forward, Some(1)), Some(6));
        assert_eq!(v.find(&s, &needle, SearchDirection::Backward, None), Some(6));
        // Backward start is one-past-end: excluding the final byte hides the last match.
        assert_eq!(v.find(&s, &needle, SearchDirection::Backward, Some(8)), Some(0));
    }

    #[test]
    fn iterator_bounds_check() {
        let s = stream_with(&["abcd"]);
        let v = s.view().advance(1).limit(2);
        assert!(v.contains(&s, StreamIter::at(1)));
        assert!(v.contains(&s, StreamIter::at(3)));
        assert!(!v.contains(&s, StreamIter::at(0)));
        assert!(!v.contains(&s, StreamIter::at(4)));
    }
}

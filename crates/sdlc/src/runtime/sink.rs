//! The stream-reassembly sink.
//!
//! A `Sink` accepts writes at absolute sequence numbers and delivers them,
//! in order, to zero or more connected sub-parsers. Out-of-order data is
//! buffered in a chunk list; gaps are recorded as data-less chunks. With
//! `auto_trim` (the default) delivered data is released immediately, so an
//! in-order stream returns the sink to its empty-state footprint.
//!
//! All sequence numbers are kept relative to `initial_seq` internally;
//! hooks receive absolute numbers.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::runtime::{
    bytes::Bytes,
    error::{RtResult, RuntimeError},
    fiber::Fiber,
    registry::{self, ConnectedUnit, MimeType},
    stream::Stream,
};

/// Overlap resolution policy. `First` keeps the bytes that arrived first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum ReassemblerPolicy {
    #[default]
    First,
}

/// Reassembly event callbacks for one connected sub-parser.
///
/// All sequence numbers are absolute. The default implementations ignore
/// the event.
pub trait SinkHooks {
    /// A gap was encountered during delivery.
    fn on_gap(&mut self, _seq: u64, _len: u64) {}
    /// Overlapping data disagreed with what was already buffered.
    fn on_overlap(&mut self, _seq: u64, _old: &Bytes, _new: &Bytes) {}
    /// `skip` moved the delivery position.
    fn on_skipped(&mut self, _seq: u64) {}
    /// Buffered data was dropped without having been delivered.
    fn on_undelivered(&mut self, _seq: u64, _data: &Bytes) {}
}

/// A filter transforming sink input before delivery.
pub trait Filter {
    /// Transforms one block of input; may buffer and return partial output.
    fn process(&mut self, data: &Bytes) -> Bytes;
}

#[derive(Debug, Clone)]
struct Chunk {
    /// `None` marks a gap.
    data: Option<Bytes>,
    rseq: u64,
    rupper: u64,
}

struct SubParser {
    name: String,
    stream: Stream,
    fiber: Fiber,
    hooks: Option<Box<dyn SinkHooks>>,
    /// Set after the sub-parser raised; later deliveries are suppressed.
    skip_delivery: bool,
}

/// Out-of-order byte reassembler feeding connected sub-parsers.
pub struct Sink {
    policy: ReassemblerPolicy,
    auto_trim: bool,
    /// Total bytes delivered (post filtering).
    size: u64,
    initial_seq: u64,
    cur_rseq: u64,
    last_reassem_rseq: u64,
    trim_rseq: u64,
    chunks: VecDeque<Chunk>,
    states: Vec<SubParser>,
    filters: Vec<Box<dyn Filter>>,
    wrote: bool,
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink {
    pub fn new() -> Self {
        Self {
            policy: ReassemblerPolicy::First,
            auto_trim: true,
            size: 0,
            initial_seq: 0,
            cur_rseq: 0,
            last_reassem_rseq: 0,
            trim_rseq: 0,
            chunks: VecDeque::new(),
            states: Vec::new(),
            filters: Vec::new(),
            wrote: false,
        }
    }

    fn reset(&mut self) {
        debug_assert!(self.states.is_empty());
        self.policy = ReassemblerPolicy::First;
        self.auto_trim = true;
        self.size = 0;
        self.initial_seq = 0;
        self.cur_rseq = 0;
        self.last_reassem_rseq = 0;
        self.trim_rseq = 0;
        self.chunks.clear();
        self.filters.clear();
        self.wrote = false;
    }

    /// Total bytes delivered so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of buffered (not yet delivered) chunks.
    pub fn buffered_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn connected_parsers(&self) -> usize {
        self.states.len()
    }

    fn rseq(&self, seq: u64) -> RtResult<u64> {
        seq.checked_sub(self.initial_seq).ok_or_else(|| {
            RuntimeError::invalid_argument(format!(
                "sequence number {seq} below initial sequence number {initial}",
                initial = self.initial_seq
            ))
        })
    }

    fn aseq(&self, rseq: u64) -> u64 {
        rseq + self.initial_seq
    }

    // -------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------

    pub fn set_auto_trim(&mut self, enabled: bool) {
        self.auto_trim = enabled;
    }

    /// Sets the sequence number the first byte is expected at. Only legal
    /// before the first write.
    pub fn set_initial_sequence_number(&mut self, seq: u64) -> RtResult<()> {
        if self.wrote {
            return Err(RuntimeError::invalid_argument(
                "cannot set initial sequence number after first write",
            ));
        }
        self.initial_seq = seq;
        Ok(())
    }

    /// Sets the overlap policy. Only legal before the first write.
    pub fn set_policy(&mut self, policy: ReassemblerPolicy) -> RtResult<()> {
        if self.wrote {
            return Err(RuntimeError::invalid_argument("cannot set policy after first write"));
        }
        self.policy = policy;
        Ok(())
    }

    /// Adds a filter to the chain. Only legal before the first write.
    pub fn connect_filter(&mut self, filter: Box<dyn Filter>) -> RtResult<()> {
        if self.wrote {
            return Err(RuntimeError::invalid_argument("cannot connect filter after first write"));
        }
        self.filters.push(filter);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------

    /// Attaches a freshly instantiated parser. Taking the unit by value
    /// guarantees it is not simultaneously connected elsewhere.
    pub fn connect(&mut self, name: impl Into<String>, unit: ConnectedUnit) {
        self.states.push(SubParser {
            name: name.into(),
            stream: Stream::new(),
            fiber: Fiber::new(unit.parser),
            hooks: unit.hooks,
            skip_delivery: false,
        });
    }

    /// Connects every registered parser advertised for the MIME type,
    /// trying `main/sub`, then `main/*`, then `*/*`. Only public parsers or
    /// parsers in the same linker scope connect.
    pub fn connect_mime_type(&mut self, mt: &MimeType, scope: u64) -> RtResult<()> {
        let mut connect_matching = |mt: &MimeType| {
            let found: Vec<(String, ConnectedUnit)> = registry::with_registry(|reg| {
                reg.by_mime_type(mt, scope)
                    .into_iter()
                    .map(|meta| (meta.name.clone(), (meta.instantiate)()))
                    .collect()
            });
            for (name, unit) in found {
                tracing::debug!(parser = %name, mime_type = %mt, "connecting parser to sink");
                self.connect(name, unit);
            }
        };

        connect_matching(mt);
        connect_matching(&MimeType::new(mt.main.clone(), "*"));
        connect_matching(&MimeType::new("*", "*"));
        Ok(())
    }

    // -------------------------------------------------------------------
    // Data entry points
    // -------------------------------------------------------------------

    /// Appends `data` at absolute `seq` (defaults to the current end).
    /// `len` defaults to the data's size. Empty data is a no-op.
    pub fn write(&mut self, data: Bytes, seq: Option<u64>, len: Option<u64>) -> RtResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.wrote = true;
        let n = len.unwrap_or_else(|| data.size());
        let rseq = match seq {
            Some(seq) => self.rseq(seq)?,
            None => self.cur_rseq,
        };
        self.new_data(Some(data), rseq, n)
    }

    /// Records a missing region of `len` bytes at absolute `seq`.
    pub fn gap(&mut self, seq: u64, len: u64) -> RtResult<()> {
        self.wrote = true;
        let rseq = self.rseq(seq)?;
        self.new_data(None, rseq, len)
    }

    /// Advances acceptance past absolute `seq`, reporting undelivered data
    /// in between and, with auto-trim, releasing it.
    pub fn skip(&mut self, seq: u64) -> RtResult<()> {
        let rseq = self.rseq(seq)?;
        tracing::debug!(rseq, "skipping sink");
        if self.auto_trim {
            self.trim_to(rseq); // reports undelivered
        } else {
            self.report_undelivered_up_to(rseq);
        }
        self.cur_rseq = rseq;
        self.last_reassem_rseq = rseq;
        self.report_skipped(rseq);
        self.try_deliver(0)
    }

    /// Drops buffered chunks up to absolute `seq`, reporting their
    /// undelivered portions.
    pub fn trim(&mut self, seq: u64) -> RtResult<()> {
        let rseq = self.rseq(seq)?;
        self.trim_to(rseq);
        Ok(())
    }

    /// Freezes every sub-parser's input and disconnects. With `orderly`,
    /// outstanding input is delivered to completion; otherwise the fibers
    /// are aborted. The sink then resets to its initial state.
    pub fn close(&mut self, orderly: bool) -> RtResult<()> {
        self.filters.clear();
        for state in &mut self.states {
            if !state.fiber.is_concluded() {
                state.stream.freeze();
                if orderly && !state.skip_delivery {
                    if let Err(err) = state.fiber.resume(&mut state.stream) {
                        tracing::debug!(parser = %state.name, error = %err, "error in connected unit during close");
                    }
                } else {
                    state.fiber.abort();
                }
            }
        }
        self.states.clear();
        self.reset();
        Ok(())
    }

    // -------------------------------------------------------------------
    // Reassembly
    // -------------------------------------------------------------------

    fn new_data(&mut self, data: Option<Bytes>, mut rseq: u64, len: u64) -> RtResult<()> {
        if len == 0 {
            return Ok(());
        }

        // Fast path: in-order data, nothing buffered, auto-trimming. The
        // chunk list stays untouched.
        if self.auto_trim && self.chunks.is_empty() && rseq == self.cur_rseq {
            self.deliver(data, rseq, rseq + len)?;
            return Ok(());
        }

        let rupper = rseq + len;

        if rupper <= self.trim_rseq {
            // Old data entirely below the trim point.
            return Ok(());
        }

        let mut data = data;
        if rseq < self.trim_rseq {
            // Partially old data; keep the good suffix.
            let amount_old = self.trim_rseq - rseq;
            rseq += amount_old;
            data = data.map(|d| d.sub(amount_old, d.size()));
        }

        let at = if self.chunks.is_empty() {
            self.chunks.push_back(Chunk { data, rseq, rupper });
            0
        } else {
            self.add_and_check(data, rseq, rupper, 0)
        };

        // Deliver if the insertion filled the leading hole.
        if self.chunks[at].rseq > self.last_reassem_rseq || self.chunks[at].rupper <= self.last_reassem_rseq {
            return Ok(());
        }
        self.try_deliver(at)
    }

    /// Inserts new data into the chunk list, splitting around overlaps and
    /// reporting mismatches. Returns the index of the chunk that now starts
    /// the new data's region.
    fn add_and_check(&mut self, mut data: Option<Bytes>, mut rseq: u64, rupper: u64, start: usize) -> usize {
        debug_assert!(!self.chunks.is_empty());

        // Common case: appending right at the end.
        if rseq == self.chunks.back().expect("not empty").rupper {
            self.chunks.push_back(Chunk { data, rseq, rupper });
            return self.chunks.len() - 1;
        }

        // First chunk that does not come completely before the new data.
        let mut c = start;
        while c < self.chunks.len() && self.chunks[c].rupper <= rseq {
            c += 1;
        }

        if c == self.chunks.len() {
            self.chunks.push_back(Chunk { data, rseq, rupper });
            return self.chunks.len() - 1;
        }

        if rupper <= self.chunks[c].rseq {
            // Comes completely before chunk c.
            self.chunks.insert(c, Chunk { data, rseq, rupper });
            return c;
        }

        // Overlap; break the new data up.
        let mut new_c = c;
        let mut had_prefix = false;

        if rseq < self.chunks[c].rseq {
            // Non-overlapping prefix before chunk c.
            let prefix_len = self.chunks[c].rseq - rseq;
            let prefix = data.as_ref().map(|d| d.sub(0, prefix_len));
            self.chunks.insert(
                c,
                Chunk {
                    data: prefix,
                    rseq,
                    rupper: rseq + prefix_len,
                },
            );
            new_c = c;
            had_prefix = true;
            c += 1; // the overlapped chunk shifted right
            data = data.map(|d| d.sub(prefix_len, d.size()));
            rseq += prefix_len;
        }

        let overlap_start = rseq;
        let new_len = rupper - rseq;
        let existing_len = self.chunks[c].rupper - overlap_start;
        let overlap_len = new_len.min(existing_len);

        let old_bytes = self.chunks[c].data.as_ref().map_or_else(Bytes::empty, |d| {
            let from = overlap_start - self.chunks[c].rseq;
            d.sub(from, from + overlap_len)
        });
        let new_bytes = data.as_ref().map_or_else(Bytes::empty, |d| d.sub(0, overlap_len));

        // First-wins: the buffered bytes stand. A disagreeing rewrite is
        // reported to the hooks.
        if old_bytes != new_bytes {
            self.report_overlap(overlap_start, &old_bytes, &new_bytes);
        }

        if data.is_some() && overlap_len < new_len {
            // Resolve the remainder of the new data beyond this chunk.
            let rest = data.map(|d| d.sub(overlap_len, d.size()));
            let rest_rseq = rseq + overlap_len;
            let inserted = self.add_and_check(rest, rest_rseq, rupper, c);
            if !had_prefix {
                new_c = inserted;
            }
        }

        new_c
    }

    /// Delivers one run of bytes (or hits a gap). Returns `false` on a gap.
    fn deliver(&mut self, data: Option<Bytes>, rseq: u64, rupper: u64) -> RtResult<bool> {
        let Some(data) = data else {
            // A gap.
            tracing::debug!(rseq, "hit gap in sink");
            if self.cur_rseq != rupper {
                self.report_gap(rseq, rupper - rseq);
                self.cur_rseq = rupper;
            }
            return Ok(false);
        };

        if data.is_empty() {
            return Ok(true);
        }

        let mut data = data;
        for filter in &mut self.filters {
            data = filter.process(&data);
        }
        if data.is_empty() {
            // Filter buffered everything; nothing to pass on yet.
            return Ok(true);
        }

        self.size += data.size();

        for state in &mut self.states {
            if state.skip_delivery {
                continue;
            }
            if state.fiber.is_concluded() {
                return Err(RuntimeError::parse_error(
                    "more data after sink's unit has already completed parsing",
                ));
            }
        }

        for state in &mut self.states {
            if state.skip_delivery || state.fiber.is_concluded() {
                continue;
            }
            state.stream.append(data.clone().into_vec())?;
            // Sub-parsers operate independently from the writer; their
            // errors are not forwarded.
            if let Err(err) = state.fiber.resume(&mut state.stream) {
                tracing::debug!(parser = %state.name, error = %err, "error in connected unit, aborting delivery");
                state.skip_delivery = true;
            }
        }

        self.cur_rseq = rupper;
        self.last_reassem_rseq = rupper;
        Ok(true)
    }

    /// Walks forward from `start`, delivering every chunk that continues the
    /// reassembled prefix.
    fn try_deliver(&mut self, start: usize) -> RtResult<()> {
        let mut idx = start;
        while idx < self.chunks.len() {
            if self.chunks[idx].rseq == self.last_reassem_rseq {
                let chunk = self.chunks[idx].clone();
                self.last_reassem_rseq += chunk.rupper - chunk.rseq;
                if !self.deliver(chunk.data, chunk.rseq, chunk.rupper)? {
                    // Hit a gap. Trim only up to the gap so data beyond it
                    // stays buffered until the gap is explicitly skipped.
                    if self.auto_trim {
                        self.trim_to(chunk.rseq);
                    }
                    break;
                }
            }
            idx += 1;
        }

        if self.auto_trim {
            self.trim_to(self.last_reassem_rseq);
        }
        Ok(())
    }

    /// Drops buffered chunks ending at or before `rseq`; a chunk straddling
    /// the trim point keeps its suffix. Undelivered data is reported.
    fn trim_to(&mut self, rseq: u64) {
        loop {
            let Some((front_rseq, front_rupper)) = self.chunks.front().map(|c| (c.rseq, c.rupper)) else {
                break;
            };
            if front_rupper <= rseq {
                let chunk = self.chunks.pop_front().expect("front exists");
                if let Some(data) = chunk.data {
                    if self.cur_rseq < chunk.rseq {
                        self.report_undelivered(chunk.rseq, data);
                    }
                }
            } else if front_rseq < rseq {
                // Straddles the trim point: drop the prefix, keep the suffix.
                let cut = rseq - front_rseq;
                let front = self.chunks.front_mut().expect("front exists");
                let dropped = front.data.as_ref().map(|d| d.sub(0, cut));
                front.data = front.data.as_ref().map(|d| d.sub(cut, d.size()));
                front.rseq = rseq;
                if let Some(dropped) = dropped {
                    if self.cur_rseq < front_rseq {
                        self.report_undelivered(front_rseq, dropped);
                    }
                }
                break;
            } else {
                break;
            }
        }
        self.trim_rseq = self.trim_rseq.max(rseq);
    }

    fn report_undelivered_up_to(&mut self, rupper: u64) {
        let pending: Vec<(u64, Bytes)> = self
            .chunks
            .iter()
            .take_while(|c| c.rseq < rupper)
            .filter_map(|c| {
                let data = c.data.as_ref()?;
                let b = if c.rupper <= rupper {
                    data.clone()
                } else {
                    data.sub(0, rupper - c.rseq)
                };
                Some((c.rseq, b))
            })
            .collect();
        for (rseq, data) in pending {
            self.report_undelivered(rseq, data);
        }
    }

    // -------------------------------------------------------------------
    // Hook reporting (absolute sequence numbers)
    // -------------------------------------------------------------------

    fn report_gap(&mut self, rseq: u64, len: u64) {
        let seq = self.aseq(rseq);
        for state in &mut self.states {
            if let Some(hooks) = &mut state.hooks {
                hooks.on_gap(seq, len);
            }
        }
    }

    fn report_overlap(&mut self, rseq: u64, old: &Bytes, new: &Bytes) {
        let seq = self.aseq(rseq);
        for state in &mut self.states {
            if let Some(hooks) = &mut state.hooks {
                hooks.on_overlap(seq, old, new);
            }
        }
    }

    fn report_skipped(&mut self, rseq: u64) {
        let seq = self.aseq(rseq);
        for state in &mut self.states {
            if let Some(hooks) = &mut state.hooks {
                hooks.on_skipped(seq);
            }
        }
    }

    fn report_undelivered(&mut self, rseq: u64, data: Bytes) {
        let seq = self.aseq(rseq);
        for state in &mut self.states {
            if let Some(hooks) = &mut state.hooks {
                hooks.on_undelivered(seq, &data);
            }
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("policy", &self.policy)
            .field("auto_trim", &self.auto_trim)
            .field("size", &self.size)
            .field("cur_rseq", &self.cur_rseq)
            .field("last_reassem_rseq", &self.last_reassem_rseq)
            .field("trim_rseq", &self.trim_rseq)
            .field("chunks", &self.chunks.len())
            .field("states", &self.states.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::runtime::{
        error::RtResult,
        fiber::{FiberStatus, Parse},
        stream::Stream,
    };

    /// Collects everything delivered; completes only at EOD.
    struct Collector {
        got: Rc<RefCell<Vec<u8>>>,
    }

    impl Parse for Collector {
        fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
            let view = input.view().advance_to(input.begin_offset() + self.got.borrow().len() as u64);
            let pending = view.data(input);
            self.got.borrow_mut().extend_from_slice(pending.as_slice());
            if input.is_frozen() {
                Ok(FiberStatus::Done)
            } else {
                Ok(FiberStatus::Suspended)
            }
        }
    }

    fn collector() -> (ConnectedUnit, Rc<RefCell<Vec<u8>>>) {
        let got = Rc::new(RefCell::new(Vec::new()));
        (
            ConnectedUnit {
                parser: Box::new(Collector { got: Rc::clone(&got) }),
                hooks: None,
            },
            got,
        )
    }

    #[derive(Default)]
    struct Events {
        gaps: Vec<(u64, u64)>,
        overlaps: Vec<(u64, Bytes, Bytes)>,
        skipped: Vec<u64>,
        undelivered: Vec<(u64, Bytes)>,
    }

    struct Recorder(Rc<RefCell<Events>>);

    impl SinkHooks for Recorder {
        fn on_gap(&mut self, seq: u64, len: u64) {
            self.0.borrow_mut().gaps.push((seq, len));
        }
        fn on_overlap(&mut self, seq: u64, old: &Bytes, new: &Bytes) {
            self.0.borrow_mut().overlaps.push((seq, old.clone(), new.clone()));
        }
        fn on_skipped(&mut self, seq: u64) {
            self.0.borrow_mut().skipped.push(seq);
        }
        fn on_undelivered(&mut self, seq: u64, data: &Bytes) {
            self.0.borrow_mut().undelivered.push((seq, data.clone()));
        }
    }

    fn recording_collector() -> (ConnectedUnit, Rc<RefCell<Vec<u8>>>, Rc<RefCell<Events>>) {
        let got = Rc::new(RefCell::new(Vec::new()));
        let events = Rc::new(RefCell::new(Events::default()));
        (
            ConnectedUnit {
                parser: Box::new(Collector { got: Rc::clone(&got) }),
                hooks: Some(Box::new(Recorder(Rc::clone(&events)))),
            },
            got,
            events,
        )
    }

    #[test]
    fn in_order_fast_path_keeps_buffer_empty() {
        let mut sink = Sink::new();
        let (unit, got) = collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("hello"), None, None).unwrap();
        sink.write(Bytes::from("world"), None, None).unwrap();
        assert_eq!(sink.buffered_chunks(), 0);
        assert_eq!(sink.size(), 10);
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"helloworld");
    }

    #[test]
    fn out_of_order_delivery_reorders() {
        let mut sink = Sink::new();
        sink.set_initial_sequence_number(100).unwrap();
        let (unit, got) = collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("world"), Some(105), Some(5)).unwrap();
        assert_eq!(sink.buffered_chunks(), 1);
        sink.write(Bytes::from("hello"), Some(100), Some(5)).unwrap();
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"helloworld");
    }

    #[test]
    fn overlap_first_policy_keeps_first_bytes() {
        let mut sink = Sink::new();
        sink.set_auto_trim(false);
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("ABCDE"), Some(0), Some(5)).unwrap();
        sink.write(Bytes::from("__C"), Some(2), Some(3)).unwrap();
        let ev = events.borrow();
        assert_eq!(ev.overlaps.len(), 1);
        let (seq, old, new) = &ev.overlaps[0];
        assert_eq!(*seq, 2);
        assert_eq!(old, &Bytes::from("CDE"));
        assert_eq!(new, &Bytes::from("__C"));
        drop(ev);
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"ABCDE");
    }

    #[test]
    fn matching_overlap_is_silent() {
        let mut sink = Sink::new();
        sink.set_auto_trim(false);
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("ABCDE"), Some(0), Some(5)).unwrap();
        sink.write(Bytes::from("CDE"), Some(2), Some(3)).unwrap();
        assert!(events.borrow().overlaps.is_empty());
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"ABCDE");
    }

    #[test]
    fn overlap_tail_beyond_buffered_data_is_delivered() {
        let mut sink = Sink::new();
        sink.set_auto_trim(false);
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("ABCDE"), Some(0), Some(5)).unwrap();
        sink.write(Bytes::from("__CDE"), Some(2), Some(5)).unwrap();
        // The disagreeing prefix is reported; the in-order tail past the
        // buffered data flows through.
        assert_eq!(events.borrow().overlaps.len(), 1);
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"ABCDEDE");
    }

    #[test]
    fn buffered_gap_blocks_delivery_until_skipped() {
        let mut sink = Sink::new();
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("bb"), Some(5), None).unwrap();
        sink.gap(2, 3).unwrap();
        sink.write(Bytes::from("aa"), Some(0), None).unwrap();
        // Delivery ran up to the gap; data past it stays buffered.
        assert_eq!(events.borrow().gaps, vec![(2, 3)]);
        assert_eq!(&*got.borrow(), b"aa");
        assert_eq!(sink.buffered_chunks(), 1);
        sink.skip(5).unwrap();
        assert_eq!(&*got.borrow(), b"aabb");
        assert_eq!(events.borrow().skipped, vec![5]);
        sink.close(true).unwrap();
    }

    #[test]
    fn in_order_gap_passes_through() {
        let mut sink = Sink::new();
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("aa"), Some(0), None).unwrap();
        sink.gap(2, 3).unwrap();
        sink.write(Bytes::from("bb"), Some(5), None).unwrap();
        // An in-order gap advances acceptance immediately.
        assert_eq!(events.borrow().gaps, vec![(2, 3)]);
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"aabb");
    }

    #[test]
    fn skip_reports_buffered_data_as_undelivered_once() {
        let mut sink = Sink::new();
        let (unit, got, events) = recording_collector();
        sink.connect("test", unit);
        // Out-of-order data that never becomes deliverable.
        sink.write(Bytes::from("xy"), Some(3), None).unwrap();
        sink.skip(5).unwrap();
        sink.write(Bytes::from("z"), Some(5), None).unwrap();
        sink.close(true).unwrap();
        let ev = events.borrow();
        assert_eq!(ev.undelivered, vec![(3, Bytes::from("xy"))]);
        assert_eq!(&*got.borrow(), b"z");
    }

    #[test]
    fn auto_trim_returns_to_empty_footprint() {
        let mut sink = Sink::new();
        let (unit, _got) = collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("cd"), Some(2), None).unwrap();
        sink.write(Bytes::from("ef"), Some(4), None).unwrap();
        sink.write(Bytes::from("ab"), Some(0), None).unwrap();
        assert_eq!(sink.buffered_chunks(), 0);
        sink.close(true).unwrap();
    }

    #[test]
    fn old_data_is_discarded() {
        let mut sink = Sink::new();
        let (unit, got) = collector();
        sink.connect("test", unit);
        sink.write(Bytes::from("abcd"), Some(0), None).unwrap();
        // Entirely behind the trim point after delivery.
        sink.write(Bytes::from("ab"), Some(0), None).unwrap();
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"abcd");
    }

    #[test]
    fn configuration_locked_after_first_write() {
        let mut sink = Sink::new();
        sink.write(Bytes::from("x"), None, None).unwrap();
        assert!(sink.set_initial_sequence_number(5).is_err());
        assert!(sink.set_policy(ReassemblerPolicy::First).is_err());
    }

    #[test]
    fn close_resets_for_reuse() {
        let mut sink = Sink::new();
        sink.set_initial_sequence_number(50).unwrap();
        sink.write(Bytes::from("abc"), None, None).unwrap();
        sink.close(true).unwrap();
        // After the reset the sink accepts configuration again.
        sink.set_initial_sequence_number(0).unwrap();
        assert_eq!(sink.size(), 0);
    }

    struct Failing;

    impl Parse for Failing {
        fn resume(&mut self, _input: &mut Stream) -> RtResult<FiberStatus> {
            Err(RuntimeError::parse_error("boom"))
        }
    }

    #[test]
    fn failing_subparser_stops_receiving_but_sink_continues() {
        let mut sink = Sink::new();
        sink.connect(
            "bad",
            ConnectedUnit {
                parser: Box::new(Failing),
                hooks: None,
            },
        );
        let (unit, got) = collector();
        sink.connect("good", unit);
        sink.write(Bytes::from("data"), None, None).unwrap();
        sink.write(Bytes::from("more"), None, None).unwrap();
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), b"datamore");
    }
}

//! Tests for the stream-reassembly sink: ordering, overlap, gaps, and
//! memory behavior.

use std::{cell::RefCell, rc::Rc};

use sdlc::{
    runtime::{registry::ConnectedUnit, Bytes, Sink, SinkHooks},
    FiberStatus, Parse, RtResult, Stream,
};

/// A sub-parser that records every delivered byte and completes at EOD.
struct Collector {
    got: Rc<RefCell<Vec<u8>>>,
}

impl Parse for Collector {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        let seen = self.got.borrow().len() as u64;
        let view = input.view().advance_to(seen);
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
    overlaps: Vec<(u64, Vec<u8>, Vec<u8>)>,
    skipped: Vec<u64>,
    undelivered: Vec<(u64, Vec<u8>)>,
}

struct Recorder(Rc<RefCell<Events>>);

impl SinkHooks for Recorder {
    fn on_gap(&mut self, seq: u64, len: u64) {
        self.0.borrow_mut().gaps.push((seq, len));
    }
    fn on_overlap(&mut self, seq: u64, old: &Bytes, new: &Bytes) {
        self.0
            .borrow_mut()
            .overlaps
            .push((seq, old.as_slice().to_vec(), new.as_slice().to_vec()));
    }
    fn on_skipped(&mut self, seq: u64) {
        self.0.borrow_mut().skipped.push(seq);
    }
    fn on_undelivered(&mut self, seq: u64, data: &Bytes) {
        self.0.borrow_mut().undelivered.push((seq, data.as_slice().to_vec()));
    }
}

fn recording() -> (ConnectedUnit, Rc<RefCell<Vec<u8>>>, Rc<RefCell<Events>>) {
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

// =============================================================================
// 1. Order independence
// =============================================================================

/// Writes covering a string without gaps or overlap deliver exactly that
/// string, regardless of write order.
#[test]
fn delivery_is_independent_of_write_order() {
    let payload = b"the quick brown fox";
    let pieces: [(u64, &[u8]); 4] = [(0, b"the "), (4, b"quick "), (10, b"brown "), (16, b"fox")];
    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

    for order in orders {
        let mut sink = Sink::new();
        let (unit, got) = collector();
        sink.connect("c", unit);
        for index in order {
            let (seq, data) = pieces[index];
            sink.write(Bytes::from(data), Some(seq), None).unwrap();
        }
        sink.close(true).unwrap();
        assert_eq!(&*got.borrow(), payload, "order {order:?}");
    }
}

/// Scenario: out-of-order delivery with an initial sequence number.
#[test]
fn out_of_order_with_initial_sequence_number() {
    let mut sink = Sink::new();
    sink.set_initial_sequence_number(100).unwrap();
    let (unit, got) = collector();
    sink.connect("p", unit);
    sink.write(Bytes::from("world"), Some(105), Some(5)).unwrap();
    sink.write(Bytes::from("hello"), Some(100), Some(5)).unwrap();
    sink.close(true).unwrap();
    assert_eq!(&*got.borrow(), b"helloworld");
}

// =============================================================================
// 2. Memory footprint
// =============================================================================

/// With auto-trim and no gaps, the sink returns to its empty footprint
/// after everything is delivered.
#[test]
fn auto_trim_returns_to_empty_footprint() {
    let mut sink = Sink::new();
    let (unit, _got) = collector();
    sink.connect("c", unit);
    sink.write(Bytes::from("ef"), Some(4), None).unwrap();
    sink.write(Bytes::from("cd"), Some(2), None).unwrap();
    assert!(sink.buffered_chunks() > 0, "out-of-order data is buffered");
    sink.write(Bytes::from("ab"), Some(0), None).unwrap();
    assert_eq!(sink.buffered_chunks(), 0, "buffer drained after delivery");
    sink.close(true).unwrap();
}

// =============================================================================
// 3. Gaps and skips
// =============================================================================

/// A gap that is later skipped over is reported as undelivered exactly
/// once and never delivered.
#[test]
fn skipped_data_reported_undelivered_exactly_once() {
    let mut sink = Sink::new();
    let (unit, got, events) = recording();
    sink.connect("p", unit);
    sink.write(Bytes::from("xy"), Some(3), None).unwrap();
    sink.skip(5).unwrap();
    sink.write(Bytes::from("z"), Some(5), None).unwrap();
    sink.close(true).unwrap();

    let ev = events.borrow();
    assert_eq!(ev.undelivered, vec![(3, b"xy".to_vec())]);
    assert_eq!(ev.skipped, vec![5]);
    assert_eq!(&*got.borrow(), b"z", "skipped bytes never delivered");
}

/// A buffered gap stops delivery; data beyond it waits for an explicit
/// skip.
#[test]
fn buffered_gap_stops_delivery_until_skip() {
    let mut sink = Sink::new();
    let (unit, got, events) = recording();
    sink.connect("p", unit);
    sink.write(Bytes::from("bb"), Some(5), None).unwrap();
    sink.gap(2, 3).unwrap();
    sink.write(Bytes::from("aa"), Some(0), None).unwrap();

    assert_eq!(events.borrow().gaps, vec![(2, 3)]);
    assert_eq!(&*got.borrow(), b"aa");

    sink.skip(5).unwrap();
    assert_eq!(&*got.borrow(), b"aabb");
    sink.close(true).unwrap();
}

// =============================================================================
// 4. Overlaps
// =============================================================================

/// Scenario: with the First policy the first write wins; the overlap hook
/// reports the old and new bytes for the disagreeing region.
#[test]
fn first_policy_overlap() {
    let mut sink = Sink::new();
    sink.set_auto_trim(false);
    let (unit, got, events) = recording();
    sink.connect("p", unit);
    sink.write(Bytes::from("ABCDE"), Some(0), Some(5)).unwrap();
    sink.write(Bytes::from("__C"), Some(2), Some(3)).unwrap();
    sink.close(true).unwrap();

    let ev = events.borrow();
    assert_eq!(ev.overlaps.len(), 1, "overlap hook fires once");
    let (seq, old, new) = &ev.overlaps[0];
    assert_eq!(*seq, 2);
    assert_eq!(old, b"CDE");
    assert_eq!(new, b"__C");
    assert_eq!(&*got.borrow(), b"ABCDE", "first write's bytes delivered");
}

/// An overlap whose bytes agree passes silently.
#[test]
fn agreeing_overlap_is_silent() {
    let mut sink = Sink::new();
    sink.set_auto_trim(false);
    let (unit, _got, events) = recording();
    sink.connect("p", unit);
    sink.write(Bytes::from("ABCDE"), Some(0), Some(5)).unwrap();
    sink.write(Bytes::from("CDE"), Some(2), Some(3)).unwrap();
    sink.close(true).unwrap();
    assert!(events.borrow().overlaps.is_empty());
}

// =============================================================================
// 5. Lifecycle
// =============================================================================

/// Multiple sub-parsers each receive the full byte stream, in connection
/// order.
#[test]
fn all_connected_parsers_receive_data() {
    let mut sink = Sink::new();
    let (unit_a, got_a) = collector();
    let (unit_b, got_b) = collector();
    sink.connect("a", unit_a);
    sink.connect("b", unit_b);
    sink.write(Bytes::from("payload"), None, None).unwrap();
    sink.close(true).unwrap();
    assert_eq!(&*got_a.borrow(), b"payload");
    assert_eq!(&*got_b.borrow(), b"payload");
}

/// Closing disorderly aborts the fibers; the sink resets either way.
#[test]
fn close_resets_sink_state() {
    let mut sink = Sink::new();
    sink.set_initial_sequence_number(42).unwrap();
    let (unit, _got) = collector();
    sink.connect("p", unit);
    sink.write(Bytes::from("abc"), None, None).unwrap();
    sink.close(false).unwrap();
    assert_eq!(sink.connected_parsers(), 0);
    assert_eq!(sink.size(), 0);
    // Configuration is legal again after the reset.
    sink.set_initial_sequence_number(0).unwrap();
    sink.set_policy(sdlc::ReassemblerPolicy::First).unwrap();
}

/// Writing more data after a sub-parser completed is a parse error.
#[test]
fn write_after_completion_is_an_error() {
    struct DoneImmediately;
    impl Parse for DoneImmediately {
        fn resume(&mut self, _input: &mut Stream) -> RtResult<FiberStatus> {
            Ok(FiberStatus::Done)
        }
    }
    let mut sink = Sink::new();
    sink.connect(
        "done",
        ConnectedUnit {
            parser: Box::new(DoneImmediately),
            hooks: None,
        },
    );
    sink.write(Bytes::from("a"), None, None).unwrap();
    let err = sink.write(Bytes::from("b"), None, None).unwrap_err();
    assert_eq!(err.kind, sdlc::ErrorKind::ParseError);
}

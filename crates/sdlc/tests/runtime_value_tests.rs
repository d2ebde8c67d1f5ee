//! Tests for the value runtime: pack/unpack round-trips, bytes
//! operations, streams, and the regex match-state protocol.

use sdlc::runtime::{
    bytes::{Charset, DecodeErrors},
    integer::{ByteOrder, SInt, UInt, Width},
    regexp::{RegExp, RegExpFlags},
    stream::SearchDirection,
    Bytes, ErrorKind, Stream,
};

// =============================================================================
// 1. Pack/unpack round-trips
// =============================================================================

/// For every primitive width and byte order, `unpack(pack(v)) == v`.
#[test]
fn integer_pack_unpack_round_trip() {
    for width in [Width::W8, Width::W16, Width::W32, Width::W64] {
        for order in [ByteOrder::Little, ByteOrder::Big, ByteOrder::Network, ByteOrder::Host] {
            let values = [0_u64, 1, 0x7f, width.unsigned_max() / 3, width.unsigned_max()];
            for value in values {
                let v = UInt::new(value, width).unwrap();
                let (back, consumed) = UInt::unpack(&v.pack(order), width, order).unwrap();
                assert_eq!(consumed, width.bytes());
                assert_eq!(back, v, "uint{} {value} via {order:?}", width.bits());
            }
            let (lo, hi) = width.signed_range();
            for value in [lo, lo / 2, -1, 0, hi / 2, hi] {
                let v = SInt::new(value, width).unwrap();
                let (back, _) = SInt::unpack(&v.pack(order), width, order).unwrap();
                assert_eq!(back, v, "int{} {value} via {order:?}", width.bits());
            }
        }
    }
}

/// UTF-8 decode/encode round-trips for valid input.
#[test]
fn utf8_decode_encode_round_trip() {
    for s in ["", "plain ascii", "näïve", "日本語テキスト", "mixed 字 and ascii"] {
        let bytes = Bytes::encode(s, Charset::Utf8).unwrap();
        let decoded = bytes.decode(Charset::Utf8, DecodeErrors::Strict).unwrap();
        assert_eq!(decoded, s);
        assert_eq!(Bytes::encode(&decoded, Charset::Utf8).unwrap(), bytes);
    }
}

// =============================================================================
// 2. Bytes operations
// =============================================================================

#[test]
fn bytes_search_and_slice() {
    let b = Bytes::from("content-length: 42");
    let (name, value) = b.split1(Some(&Bytes::from(": ")));
    assert_eq!(name, Bytes::from("content-length"));
    assert_eq!(value.to_int(10).unwrap(), 42);
    assert!(b.lower().starts_with(&Bytes::from("content")));
    assert_eq!(b.find(&Bytes::from("length")), Some(8));
}

#[test]
fn bytes_binary_conversions() {
    assert_eq!(Bytes::new(vec![0xde, 0xad]).to_uint_binary(ByteOrder::Big).unwrap(), 0xdead);
    assert_eq!(
        Bytes::new(vec![0xde, 0xad]).to_uint_binary(ByteOrder::Little).unwrap(),
        0xadde
    );
    assert_eq!(Bytes::new(vec![0x80]).to_int_binary(ByteOrder::Big).unwrap(), -128);
}

// =============================================================================
// 3. Streams and views
// =============================================================================

#[test]
fn open_views_extend_and_trimmed_views_do_not() {
    let mut stream = Stream::new();
    stream.append(b"abcd".to_vec()).unwrap();
    let open = stream.view();
    let fixed = stream.view().limit(2);
    stream.append(b"ef".to_vec()).unwrap();
    assert_eq!(open.len(&stream), 6);
    assert_eq!(fixed.len(&stream), 2);
    assert_eq!(fixed.data(&stream), Bytes::from("ab"));
}

/// Backward find treats `start` as one-past-end.
#[test]
fn view_find_backward_start_is_one_past_end() {
    let mut stream = Stream::new();
    stream.append(b"abcabc".to_vec()).unwrap();
    let view = stream.view();
    let needle = Bytes::from("abc");
    assert_eq!(view.find(&stream, &needle, SearchDirection::Backward, None), Some(3));
    assert_eq!(view.find(&stream, &needle, SearchDirection::Backward, Some(5)), Some(0));
    assert_eq!(view.find(&stream, &needle, SearchDirection::Forward, Some(1)), Some(3));
}

#[test]
fn iterators_expose_absolute_offsets() {
    let mut stream = Stream::new();
    stream.append(b"xyz".to_vec()).unwrap();
    let view = stream.view().advance(2);
    assert_eq!(view.begin_iter().offset(), 2);
    assert!(view.contains(&stream, stream.at(3)));
    assert!(!view.contains(&stream, stream.at(1)));
}

// =============================================================================
// 4. Regex match states
// =============================================================================

/// The three matcher outcomes across chunk boundaries.
#[test]
fn match_state_streams_across_chunks() {
    let re = RegExp::new(&["[a-z]+:"], RegExpFlags { no_sub: true }).unwrap();
    let mut state = re.token_matcher();
    assert_eq!(state.advance(b"con", false).unwrap(), (-1, 0));
    assert_eq!(state.advance(b"tent", false).unwrap(), (-1, 0));
    assert_eq!(state.advance(b": 42", false).unwrap(), (1, 8));
}

/// Feeding a concluded state raises `MatchStateReuse`.
#[test]
fn concluded_match_state_rejects_reuse() {
    let re = RegExp::new(&["ab"], RegExpFlags { no_sub: true }).unwrap();
    let mut state = re.token_matcher();
    assert_eq!(state.advance(b"abc", false).unwrap(), (1, 2));
    assert_eq!(state.advance(b"x", false).unwrap_err().kind, ErrorKind::MatchStateReuse);
}

/// States of capture-group patterns are movable but not clonable.
#[test]
fn capture_states_cannot_be_cloned() {
    let plain = RegExp::new(&["ab+"], RegExpFlags { no_sub: true }).unwrap();
    assert!(plain.token_matcher().try_clone().is_ok());

    let capturing = RegExp::new(&["(a)(b+)"], RegExpFlags { no_sub: false }).unwrap();
    let err = capturing.token_matcher().try_clone().unwrap_err();
    assert_eq!(err.kind, ErrorKind::PatternError);
}

#[test]
fn capture_groups_extract_after_match() {
    let re = RegExp::new(&["([A-Z]+) ([^ ]+)"], RegExpFlags::default()).unwrap();
    let mut state = re.token_matcher();
    let (accept, len) = state.advance(b"GET /index HTTP", false).unwrap();
    assert_eq!(accept, 1);
    assert_eq!(len, 10);
    let caps = state.captures().unwrap();
    assert_eq!(caps[1], Bytes::from("GET"));
    assert_eq!(caps[2], Bytes::from("/index"));
}

// =============================================================================
// 5. Memory statistics
// =============================================================================

#[test]
fn memory_statistics_track_stream_bytes() {
    // Tests run concurrently and the counters are global, so only the
    // contribution of this test's own allocation is asserted.
    let mut stream = Stream::new();
    stream.append(vec![0_u8; 4096]).unwrap();
    let during = sdlc::memory_statistics();
    assert!(during.stream_bytes >= 4096);
    assert!(during.stream_bytes_max >= 4096);
}

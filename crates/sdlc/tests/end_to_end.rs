//! End-to-end seed scenarios.
//!
//! The native back-end is an external collaborator, so each scenario runs
//! twice here: the unit's source is compiled through the full pipeline to
//! IML, and the generated parse procedure's shape is exercised directly
//! through a hand-written fiber following the same state machine against
//! real input streams.

use std::path::Path;

use sdlc::{
    runtime::{
        bytes::Bytes,
        fiber::{self, Wait},
        integer::{ByteOrder, UInt, Width},
        stream::{SearchDirection, Stream, View},
    },
    CompilerOptions, Dialect, Driver, ErrorKind, FiberStatus, Parse, RtResult, RuntimeError,
};

fn compile(source: &str) -> String {
    let mut driver = Driver::new(CompilerOptions::default());
    driver
        .parse_string(source, Path::new("scenario.sdl"), Dialect::Sdl)
        .expect("parse");
    driver.process_ast().unwrap_or_else(|()| {
        panic!(
            "processing failed: {:?}",
            driver.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>()
        )
    });
    driver.emit("Scenario").expect("compiled module")
}

// =============================================================================
// Scenario 1: literal bytes field
// =============================================================================

/// `type M = unit { x: b"HELLO"; };`. The generated machine: wait for 5
/// bytes, compare, advance.
struct LiteralParser {
    cur: Option<View>,
    x: Option<Bytes>,
}

impl Parse for LiteralParser {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        let literal = Bytes::from("HELLO");
        let cur = self.cur.get_or_insert_with(|| input.view());
        match fiber::wait_for_input(input, *cur, literal.size(), "expecting 5 bytes", "scenario.sdl:2")? {
            Wait::Suspend => return Ok(FiberStatus::Suspended),
            Wait::Ready => {}
        }
        if !cur.starts_with(input, &literal) {
            return Err(RuntimeError::parse_error("expecting literal b\"HELLO\""));
        }
        self.x = Some(literal.clone());
        *cur = cur.advance(literal.size());
        Ok(FiberStatus::Done)
    }
}

#[test]
fn scenario_1_literal_bytes_field_compiles() {
    let text = compile("module Scenario;\npublic type M = unit { x: b\"HELLO\"; };");
    assert!(text.contains("cur.starts_with(b\"HELLO\")"));
    assert!(text.contains("expecting 5 bytes"));
}

#[test]
fn scenario_1_literal_match_succeeds() {
    let mut stream = Stream::new();
    stream.append(b"HELLO".to_vec()).unwrap();
    let mut parser = LiteralParser { cur: None, x: None };
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.x, Some(Bytes::from("HELLO")));
    assert_eq!(parser.cur.unwrap().begin(), 5, "cur advanced past the literal");
}

#[test]
fn scenario_1_short_input_raises_expecting_bytes() {
    let mut stream = Stream::new();
    stream.append(b"HELL".to_vec()).unwrap();
    let mut parser = LiteralParser { cur: None, x: None };
    // Not enough input: the fiber suspends.
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Suspended);
    // Freezing concludes the wait with a parse error.
    stream.freeze();
    let err = parser.resume(&mut stream).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseError);
    assert!(err.message.contains("expecting 5 bytes"));
}

// =============================================================================
// Scenario 2: size-constrained bytes
// =============================================================================

struct SizedParser {
    cur: Option<View>,
    x: Option<Bytes>,
}

impl Parse for SizedParser {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        let cur = self.cur.get_or_insert_with(|| input.view());
        match fiber::wait_for_input(input, *cur, 4, "expecting &size bytes", "scenario.sdl:2")? {
            Wait::Suspend => return Ok(FiberStatus::Suspended),
            Wait::Ready => {}
        }
        self.x = cur.read(input, 4);
        *cur = cur.advance(4);
        Ok(FiberStatus::Done)
    }
}

#[test]
fn scenario_2_size_constrained_bytes() {
    let text = compile("module Scenario;\npublic type M = unit { x: bytes &size=4; };");
    assert!(text.contains("sdlc_rt::wait_for_input"));

    let mut stream = Stream::new();
    stream.append(b"ABCD_".to_vec()).unwrap();
    let mut parser = SizedParser { cur: None, x: None };
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.x, Some(Bytes::from("ABCD")));
    let rest = parser.cur.unwrap().data(&stream);
    assert!(rest.starts_with(&Bytes::from("_")), "cur starts with the remainder");
}

// =============================================================================
// Scenario 3: until-delimited bytes
// =============================================================================

struct UntilParser {
    including: bool,
    cur: Option<View>,
    x: Option<Bytes>,
}

impl Parse for UntilParser {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        let needle = Bytes::from("\r\n");
        let cur = self.cur.get_or_insert_with(|| input.view());
        match cur.find(input, &needle, SearchDirection::Forward, None) {
            Some(at) => {
                let offset = at - cur.begin();
                let taken = if self.including { offset + needle.size() } else { offset };
                self.x = cur.read(input, taken);
                *cur = cur.advance(offset + needle.size());
                Ok(FiberStatus::Done)
            }
            None if cur.at_eod(input) => Err(RuntimeError::parse_error("&until terminator not found")),
            None => Ok(FiberStatus::Suspended),
        }
    }
}

#[test]
fn scenario_3_until_delimited() {
    let text = compile("module Scenario;\npublic type M = unit { x: bytes &until=b\"\\x0d\\x0a\"; };");
    assert!(text.contains("cur.find("));

    let mut stream = Stream::new();
    stream.append(b"foo\r\nbar".to_vec()).unwrap();
    let mut parser = UntilParser {
        including: false,
        cur: None,
        x: None,
    };
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.x, Some(Bytes::from("foo")));
    assert!(parser.cur.unwrap().data(&stream).starts_with(&Bytes::from("b")));
}

#[test]
fn scenario_3_until_including_keeps_terminator() {
    let mut stream = Stream::new();
    stream.append(b"foo\r\nbar".to_vec()).unwrap();
    let mut parser = UntilParser {
        including: true,
        cur: None,
        x: None,
    };
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.x, Some(Bytes::from("foo\r\n")));
    assert!(parser.cur.unwrap().data(&stream).starts_with(&Bytes::from("b")));
}

/// The terminator may straddle chunk boundaries.
#[test]
fn scenario_3_terminator_across_chunks() {
    let mut stream = Stream::new();
    let mut parser = UntilParser {
        including: false,
        cur: None,
        x: None,
    };
    stream.append(b"foo\r".to_vec()).unwrap();
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Suspended);
    stream.append(b"\nbar".to_vec()).unwrap();
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.x, Some(Bytes::from("foo")));
}

// =============================================================================
// Scenario 4: counted vector of big-endian integers
// =============================================================================

struct VectorParser {
    cur: Option<View>,
    n: Option<u8>,
    xs: Vec<u16>,
}

impl Parse for VectorParser {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        let cur = self.cur.get_or_insert_with(|| input.view());

        if self.n.is_none() {
            match fiber::wait_for_input(input, *cur, 1, "expecting 1 bytes", "scenario.sdl:2")? {
                Wait::Suspend => return Ok(FiberStatus::Suspended),
                Wait::Ready => {}
            }
            let data = cur.read(input, 1).expect("wait granted");
            let (value, used) = UInt::unpack(data.as_slice(), Width::W8, ByteOrder::Network)?;
            self.n = Some(value.value() as u8);
            *cur = cur.advance(used as u64);
        }

        let n = usize::from(self.n.expect("set above"));
        while self.xs.len() < n {
            match fiber::wait_for_input(input, *cur, 2, "expecting 2 bytes", "scenario.sdl:3")? {
                Wait::Suspend => return Ok(FiberStatus::Suspended),
                Wait::Ready => {}
            }
            let data = cur.read(input, 2).expect("wait granted");
            let (value, used) = UInt::unpack(data.as_slice(), Width::W16, ByteOrder::Big)?;
            self.xs.push(value.value() as u16);
            *cur = cur.advance(used as u64);
        }
        Ok(FiberStatus::Done)
    }
}

#[test]
fn scenario_4_counted_vector() {
    let text = compile("module Scenario;\npublic type M = unit { n: uint8; xs: uint16[n] &byte-order=Big; };");
    assert!(text.contains("unpack<uint16>(cur, ByteOrder::Big)"));

    let mut stream = Stream::new();
    stream.append(vec![0x02, 0x00, 0x01, 0x00, 0x02]).unwrap();
    let mut parser = VectorParser {
        cur: None,
        n: None,
        xs: Vec::new(),
    };
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.n, Some(2));
    assert_eq!(parser.xs, vec![1, 2]);
}

/// The vector parser suspends mid-element and resumes where it left off.
#[test]
fn scenario_4_resumes_across_chunks() {
    let mut stream = Stream::new();
    let mut parser = VectorParser {
        cur: None,
        n: None,
        xs: Vec::new(),
    };
    stream.append(vec![0x02, 0x00]).unwrap();
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Suspended);
    assert_eq!(parser.n, Some(2), "count field already parsed");
    stream.append(vec![0x01, 0x00]).unwrap();
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Suspended);
    assert_eq!(parser.xs, vec![1]);
    stream.append(vec![0x02]).unwrap();
    assert_eq!(parser.resume(&mut stream).unwrap(), FiberStatus::Done);
    assert_eq!(parser.xs, vec![1, 2]);
}

//! Tests for the parser-builder: the IML emitted for the core field
//! shapes.

use std::path::Path;

use sdlc::{CompilerOptions, Dialect, Driver};

fn emit(source: &str) -> String {
    let mut driver = Driver::new(CompilerOptions::default());
    driver
        .parse_string(source, Path::new("t.sdl"), Dialect::Sdl)
        .expect("parse");
    driver.process_ast().unwrap_or_else(|()| {
        panic!(
            "processing failed: {:?}",
            driver.diagnostics().iter().map(ToString::to_string).collect::<Vec<_>>()
        )
    });
    driver.emit("Proto").expect("compiled module")
}

// =============================================================================
// 1. Parse function shape
// =============================================================================

#[test]
fn parse_function_signature_and_state() {
    let text = emit("module Proto;\npublic type M = unit { x: uint8; };");
    assert!(
        text.contains("function Proto::M::parse(self: strong_ref<Proto::M>, data: strong_ref<stream>, cur: view, trim: bool, lahead: int32, lahead_end: iterator) : tuple<view, int32, iterator> {"),
        "signature missing:\n{text}"
    );
    assert!(text.contains("return (cur, lahead, lahead_end);"), "{text}");
}

#[test]
fn struct_layout_skips_transient_fields() {
    let text = emit("module Proto;\npublic type M = unit { : skip bytes &size=2; x: uint8; };");
    assert!(text.contains("type Proto::M = struct { x: uint8 };"), "{text}");
}

// =============================================================================
// 2. Literal matching
// =============================================================================

#[test]
fn bytes_literal_emits_two_arm_match() {
    let text = emit("module Proto;\npublic type M = unit { x: b\"HELLO\"; };");
    // Peeked-token arm and direct-match arm.
    assert!(text.contains("if ( (lahead != 0) )"), "{text}");
    assert!(text.contains("cur.starts_with(b\"HELLO\")"), "{text}");
    assert!(text.contains("expecting 5 bytes"), "{text}");
    assert!(text.contains("cur.advance(5)"), "{text}");
}

#[test]
fn regex_literal_emits_matcher_loop() {
    let text = emit("module Proto;\npublic type M = unit { x: /[a-z]+/; };");
    assert!(text.contains("token_matcher()"), "{text}");
    assert!(text.contains("sdlc_rt::at_eod(data, cur)"), "{text}");
    assert!(text.contains("failed to match regular expression"), "{text}");
}

#[test]
fn integer_literal_parses_then_compares() {
    let text = emit("module Proto;\npublic type M = unit { v: uint8(22); };");
    assert!(text.contains("unpack<uint8>"), "{text}");
    assert!(text.contains("expecting value 22"), "{text}");
}

// =============================================================================
// 3. Type parsing
// =============================================================================

#[test]
fn integer_field_uses_byte_order_chain() {
    let text = emit(
        "module Proto;\n%byte-order = Little;\npublic type M = unit { a: uint16; b: uint16 &byte-order=Big; };",
    );
    // Field attribute wins; the module property (copied into the unit)
    // covers the rest.
    assert!(text.contains("unpack<uint16>(cur, ByteOrder::Big)"), "{text}");
    assert!(text.contains("unpack<uint16>(cur, ByteOrder::Little)"), "{text}");
}

#[test]
fn address_field_takes_length_from_family() {
    let text = emit("module Proto;\npublic type M = unit { a: addr &ipv6; b: addr &ipv4; };");
    assert!(text.contains("unpack<addr>(cur, 16, ByteOrder::Network)"), "{text}");
    assert!(text.contains("unpack<addr>(cur, 4, ByteOrder::Network)"), "{text}");
}

#[test]
fn sized_bytes_field_waits_then_slices() {
    let text = emit("module Proto;\npublic type M = unit { x: bytes &size=4; };");
    assert!(text.contains("sdlc_rt::wait_for_input(data, cur, "), "{text}");
    assert!(text.contains("cur.sub(0, "), "{text}");
}

#[test]
fn until_bytes_field_scans_for_needle() {
    let text = emit("module Proto;\npublic type M = unit { x: bytes &until=b\"\\x0d\\x0a\"; };");
    assert!(text.contains("cur.find("), "{text}");
    assert!(text.contains("&until terminator not found"), "{text}");
}

#[test]
fn eod_bytes_field_waits_for_eod() {
    let text = emit("module Proto;\npublic type M = unit { x: bytes &eod; };");
    assert!(text.contains("sdlc_rt::wait_for_eod(data, cur)"), "{text}");
}

#[test]
fn chunked_bytes_field_loops_per_chunk() {
    let text = emit("module Proto;\npublic type M = unit { x: bytes &eod &chunked { } };");
    assert!(text.contains("sdlc_rt::wait_for_input_or_eod(data, cur, 1)"), "{text}");
}

// =============================================================================
// 4. Loops and switches
// =============================================================================

#[test]
fn counted_vector_emits_bounded_loop() {
    let text = emit("module Proto;\npublic type M = unit { n: uint8; xs: uint16[n] &byte-order=Big; };");
    assert!(text.contains("while ("), "{text}");
    assert!(text.contains("push_back"), "{text}");
    assert!(text.contains("self.xs = "), "{text}");
}

#[test]
fn switch_compiles_to_guarded_chain() {
    let text = emit(
        "module Proto;\npublic type M = unit { t: uint8; switch (self.t) { 1 -> a: uint8; * -> b: uint16; }; };",
    );
    assert!(text.contains("no matching switch case") || text.contains("else"), "{text}");
    assert!(text.contains("unpack<uint16>"), "{text}");
}

#[test]
fn lookahead_loop_probes_terminator() {
    let text = emit("module Proto;\npublic type M = unit { xs: uint8[]; t: b\"END\"; };");
    assert!(text.contains("starts_with(b\"END\")"), "{text}");
    assert!(text.contains("break;"), "{text}");
}

// =============================================================================
// 5. Hooks, sinks, random access
// =============================================================================

#[test]
fn unit_hooks_emit_functions_and_calls() {
    let text = emit("module Proto;\npublic type M = unit { x: uint8 { } on %done { } %error { } };");
    assert!(text.contains("__on_done"), "{text}");
    assert!(text.contains("__on_error"), "{text}");
    assert!(text.contains("__on_x"), "{text}");
    assert!(text.contains("catch ( __except: error )"), "{text}");
}

#[test]
fn random_access_units_record_their_start() {
    let text = emit("module Proto;\npublic type M = unit { %random-access; x: uint8; };");
    assert!(text.contains("self.__begin = cur.begin()"), "{text}");
}

#[test]
fn field_sinks_receive_writes() {
    let text = emit("module Proto;\npublic type M = unit { sink out; x: bytes &size=2 -> self.out; };");
    assert!(text.contains("sdlc_rt::new_sink()"), "{text}");
    assert!(text.contains(".write("), "{text}");
}

#[test]
fn registration_function_for_public_units() {
    let text = emit("module Proto;\npublic type M = unit { %mime-type = \"x/y\"; v: uint8; };");
    assert!(text.contains("Proto::M::__register"), "{text}");
    assert!(text.contains("sdlc_rt::register_parser"), "{text}");
    assert!(text.contains("\"x/y\""), "{text}");
}

#[test]
fn trim_is_conditional_on_the_trim_flag() {
    let text = emit("module Proto;\npublic type M = unit { x: uint8; };");
    assert!(text.contains("if ( trim )"), "{text}");
    assert!(text.contains("data.trim(cur.begin())"), "{text}");
}

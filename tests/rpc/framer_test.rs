//! Tests for line framing of child output.

use futures_util::StreamExt;
use serde_json::{json, Value};
use stdio_bridge::rpc::{frame_stream, JsonLinesCodec, LineFramer};

const MESSAGES: &[u8] = b"{\"id\":1,\"result\":\"a\"}\n\n{\"id\":\"two\",\"result\":{\"nested\":[1,2]}}\r\n{\"id\":3,\"result\":\"caf\xc3\xa9\"}\n";

fn expected() -> Vec<Value> {
    vec![
        json!({"id": 1, "result": "a"}),
        json!({"id": "two", "result": {"nested": [1, 2]}}),
        json!({"id": 3, "result": "café"}),
    ]
}

#[test]
fn every_split_point_yields_the_same_values() {
    for split in 0..=MESSAGES.len() {
        let mut framer = LineFramer::new();
        let mut values: Vec<Value> = framer.feed(&MESSAGES[..split]).collect();
        values.extend(framer.feed(&MESSAGES[split..]));

        assert_eq!(values, expected(), "split at byte {split}");
        assert_eq!(framer.buffered(), 0);
    }
}

#[test]
fn byte_at_a_time_yields_the_same_values() {
    let mut framer = LineFramer::new();
    let values: Vec<Value> = MESSAGES
        .iter()
        .flat_map(|byte| framer.feed(std::slice::from_ref(byte)).collect::<Vec<_>>())
        .collect();

    assert_eq!(values, expected());
}

#[test]
fn malformed_line_between_valid_lines_is_skipped() {
    let mut framer = LineFramer::new();
    let values: Vec<Value> = framer
        .feed(b"{\"id\":1}\nnot json at all\n{\"id\":2}\n")
        .collect();

    assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2})]);
    assert_eq!(framer.malformed_count(), 1);
}

#[test]
fn oversized_line_split_across_chunks_resynchronises() {
    let mut framer = LineFramer::with_max_line_bytes(16);
    let long = format!("{{\"id\":1,\"padding\":\"{}\"}}", "x".repeat(64));

    assert_eq!(framer.feed(&long.as_bytes()[..40]).count(), 0);
    let values: Vec<Value> = framer
        .feed(&[&long.as_bytes()[40..], b"\n{\"id\":2}\n".as_slice()].concat())
        .collect();

    assert_eq!(values, vec![json!({"id": 2})]);
    assert_eq!(framer.malformed_count(), 1);
}

#[tokio::test]
async fn stream_reassembles_values_across_reads() {
    let reader = tokio_test::io::Builder::new()
        .read(b"{\"id\":1,\"res")
        .read(b"ult\":true}\n{\"id\"")
        .read(b":2}\n")
        .build();

    let values: Vec<Value> = Box::pin(frame_stream(reader, JsonLinesCodec::new()))
        .collect()
        .await;

    assert_eq!(
        values,
        vec![json!({"id": 1, "result": true}), json!({"id": 2})]
    );
}

#[tokio::test]
async fn stream_discards_unterminated_tail_at_eof() {
    let reader = tokio_test::io::Builder::new()
        .read(b"{\"id\":1}\n{\"id\":2}")
        .build();

    let values: Vec<Value> = Box::pin(frame_stream(reader, JsonLinesCodec::new()))
        .collect()
        .await;

    assert_eq!(values, vec![json!({"id": 1})]);
}

#[test]
fn invalid_utf8_line_is_skipped() {
    let mut framer = LineFramer::new();
    let values: Vec<Value> = framer.feed(b"{\"id\":\xff\xfe}\n{\"id\":2}\n").collect();

    assert_eq!(values, vec![json!({"id": 2})]);
    assert_eq!(framer.malformed_count(), 1);
}

#[tokio::test]
async fn stream_survives_oversized_line() {
    let reader = tokio_test::io::Builder::new()
        .read(b"{\"id\":1}\n[\"xxxxxxxx")
        .read(b"xxxxxxxxxxxxxxxx")
        .read(b"xx\"]\n{\"id\":2}\n")
        .build();

    let codec = JsonLinesCodec::with_max_line_bytes(16);
    let values: Vec<Value> = Box::pin(frame_stream(reader, codec)).collect().await;

    assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2})]);
}

//! Decoding of streamed records as consumers see them.

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use wiki_lens_core::StreamEvent;
use wiki_lens_llm::{read_stream, ByteStream, ChunkedStreamReader, StreamOutcome};

fn body(chunks: &[&'static str]) -> ByteStream {
    stream::iter(
        chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect::<Vec<_>>(),
    )
    .boxed()
}

#[tokio::test]
async fn test_reasoning_ends_at_first_content_record() {
    let chunks = body(&[
        "data: {\"type\":\"reasoning\",\"content\":\"a\"}\n\n",
        "data: {\"type\":\"content\",\"content\":\"b\"}\n\n",
        "data: [DONE]\n\n",
    ]);

    let mut events = Vec::new();
    let mut reasoning_done_at = None;
    let outcome = read_stream(chunks, CancellationToken::new(), None, |event| {
        if reasoning_done_at.is_none() && matches!(event, StreamEvent::Content { .. }) {
            reasoning_done_at = Some(events.len());
        }
        events.push(event);
    })
    .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Reasoning {
                content: "a".into()
            },
            StreamEvent::Content {
                content: "b".into()
            },
            StreamEvent::Done,
        ]
    );
    assert_eq!(reasoning_done_at, Some(1));
    assert_eq!(outcome, StreamOutcome::Completed);
}

#[test]
fn test_records_split_at_arbitrary_byte_offsets() {
    let wire = "data: {\"type\":\"content\",\"content\":\"héllo\"}\n\ndata: {\"type\":\"progress\",\"count\":7}\n\ndata: [DONE]\n\n";
    let bytes = wire.as_bytes();

    for split in 1..bytes.len() {
        let mut reader = ChunkedStreamReader::new();
        let mut events = reader.push(&bytes[..split]);
        events.extend(reader.push(&bytes[split..]));
        events.extend(reader.finish());
        assert_eq!(
            events,
            vec![
                StreamEvent::Content {
                    content: "héllo".into()
                },
                StreamEvent::Progress { count: 7 },
                StreamEvent::Done,
            ],
            "split at byte {}",
            split
        );
    }
}

#[tokio::test]
async fn test_cancelled_stream_delivers_nothing_more() {
    let token = CancellationToken::new();
    token.cancel();
    let mut events = Vec::new();

    let outcome = read_stream(
        body(&["data: {\"type\":\"content\",\"content\":\"late\"}\n\n"]),
        token,
        None,
        |event| events.push(event),
    )
    .await;

    assert!(events.is_empty());
    assert_eq!(outcome, StreamOutcome::Cancelled);
}

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Events emitted while relaying a streamed completion.
///
/// A stream is forward-only: zero or more `TextDelta`s, then exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// Stream completed. `stop_reason` is empty when the provider ended with
    /// `[DONE]` without a finish reason.
    Done { stop_reason: String },

    /// Error during streaming.
    Error { message: String },
}

/// Parse a single SSE line.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
            .map(|data| SseParsed::Data(data.trim_start().to_string()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Encode a text chunk as one SSE frame for a client transport:
/// `data: {"content":"..."}\n\n`.
pub fn sse_frame(text: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "content": text }))
}

/// Relay an OpenAI-style SSE byte stream as [`StreamEvent`]s.
///
/// Ends at `data: [DONE]`, at the first chunk carrying a finish reason, or at
/// end of input; always sends exactly one terminal event unless the receiver
/// is gone. Bytes are buffered per line so multi-byte characters split across
/// chunks decode correctly.
pub async fn relay_sse<S, B, E>(bytes: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        buf.extend_from_slice(chunk.as_ref());

        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let Ok(line) = std::str::from_utf8(&line) else {
                warn!("skipping non-UTF-8 stream line");
                continue;
            };
            match handle_line(line.trim(), &tx).await {
                LineOutcome::Continue => {}
                LineOutcome::Finished(stop_reason) => {
                    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
                    return;
                }
                LineOutcome::ReceiverGone => return,
            }
        }
    }

    // Input ended without an explicit terminator; flush a trailing line.
    if let Ok(line) = std::str::from_utf8(&buf) {
        match handle_line(line.trim(), &tx).await {
            LineOutcome::ReceiverGone => return,
            LineOutcome::Finished(stop_reason) => {
                let _ = tx.send(StreamEvent::Done { stop_reason }).await;
                return;
            }
            LineOutcome::Continue => {}
        }
    }
    let _ = tx
        .send(StreamEvent::Done {
            stop_reason: String::new(),
        })
        .await;
}

enum LineOutcome {
    Continue,
    Finished(String),
    ReceiverGone,
}

async fn handle_line(line: &str, tx: &mpsc::Sender<StreamEvent>) -> LineOutcome {
    if line.is_empty() {
        return LineOutcome::Continue;
    }
    let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
        return LineOutcome::Continue;
    };
    if data.trim() == "[DONE]" {
        return LineOutcome::Finished(String::new());
    }
    let chunk = match serde_json::from_str::<StreamChunk>(&data) {
        Ok(c) => c,
        Err(e) => {
            warn!("unparseable stream chunk: {e}");
            return LineOutcome::Continue;
        }
    };
    for choice in chunk.choices {
        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            return LineOutcome::Finished(reason);
        }
        if let Some(content) = choice.delta.and_then(|d| d.content) {
            if content.is_empty() {
                continue;
            }
            debug!(len = content.len(), "stream text delta");
            if tx.send(StreamEvent::TextDelta { text: content }).await.is_err() {
                return LineOutcome::ReceiverGone;
            }
        }
    }
    LineOutcome::Continue
}

// Streaming chunk types (deserialization only)

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static str>) -> Vec<StreamEvent> {
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(c.as_bytes().to_vec())),
        );
        let (tx, mut rx) = mpsc::channel(32);
        relay_sse(stream, tx).await;
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta { text: text.into() }
    }

    #[test]
    fn frame_format() {
        assert_eq!(sse_frame("hi \"you\""), "data: {\"content\":\"hi \\\"you\\\"\"}\n\n");
    }

    #[test]
    fn parses_data_and_event_lines() {
        assert_eq!(
            parse_sse_line("data: {\"a\":1}"),
            Some(SseParsed::Data("{\"a\":1}".into()))
        );
        assert_eq!(
            parse_sse_line("event: ping"),
            Some(SseParsed::Event("ping".into()))
        );
        assert_eq!(parse_sse_line(": comment"), None);
    }

    #[tokio::test]
    async fn stops_at_done_marker() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}\n\ndata: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                delta("The "),
                delta("end"),
                StreamEvent::Done {
                    stop_reason: String::new()
                }
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_first_finish_reason() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                delta("a"),
                StreamEvent::Done {
                    stop_reason: "stop".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let events = collect(vec![
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"whole\"}}]}\n",
        ])
        .await;
        assert_eq!(events[0], delta("whole"));
        assert!(matches!(events[1], StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn transport_error_terminates_stream() {
        let stream = futures_util::stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n".to_vec()),
            Err(std::io::Error::other("reset")),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        relay_sse(stream, tx).await;
        assert_eq!(rx.recv().await, Some(delta("x")));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error { .. })));
        assert_eq!(rx.recv().await, None);
    }
}

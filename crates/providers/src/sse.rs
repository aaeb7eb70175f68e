//! Incremental SSE frame decoding for provider adapters.
//!
//! Provider responses arrive as arbitrary byte chunks that rarely align
//! with frame boundaries. [`FrameDecoder`] consumes chunks line by line
//! and assembles complete [`SseFrame`]s: comment lines are discarded as
//! keep-alives, `event:` names are captured, and multiple `data:` lines
//! within one frame are joined per the SSE spec. [`frame_stream`] wires a
//! decoder to a `reqwest::Response` and a provider-specific frame parser.

use crate::from_reqwest;
use sg_domain::error::Result;
use sg_domain::stream::{BoxStream, StreamEvent};

/// One decoded frame: the optional `event:` name and the joined `data:`
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Streaming frame assembler. Feed it chunks as they arrive; it hands
/// back every frame completed by that chunk and keeps partial state
/// (including a split line) for the next call.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    /// Bytes of the current, not-yet-terminated line.
    partial_line: String,
    /// `event:` name seen in the frame being assembled.
    event: Option<String>,
    /// `data:` lines of the frame being assembled.
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning the frames it completed.
    pub(crate) fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.partial_line.push_str(chunk);

        while let Some(newline) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                // Blank line terminates the frame.
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
            } else {
                self.absorb_line(line);
            }
        }

        frames
    }

    /// Flush at end of stream: a trailing unterminated line still counts,
    /// and whatever frame is half-assembled is returned.
    pub(crate) fn finish(&mut self) -> Option<SseFrame> {
        if !self.partial_line.is_empty() {
            let line = std::mem::take(&mut self.partial_line);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                self.absorb_line(line);
            }
        }
        self.take_frame()
    }

    fn absorb_line(&mut self, line: &str) {
        // Comment lines (": heartbeat") are transport keep-alives.
        if line.starts_with(':') {
            return;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
        } else if let Some(payload) = line.strip_prefix("data:") {
            // Only the single space after the colon is part of the field
            // syntax; further whitespace belongs to the payload.
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            self.data_lines.push(payload.trim_end().to_string());
        }
        // `id:` / `retry:` fields carry nothing a chat stream needs.
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseFrame {
            event: self.event.take(),
            data,
        })
    }
}

/// Build a [`BoxStream`] of provider events from an SSE `reqwest::Response`.
///
/// Each decoded frame goes through `parse_frame` (FnMut so parsers may
/// keep assembly state). The trailing partial frame is flushed when the
/// body closes, and a fallback `Done` is emitted if the parser never
/// produced one.
pub(crate) fn frame_stream<F>(
    response: reqwest::Response,
    mut parse_frame: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(SseFrame) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut decoder = FrameDecoder::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    for frame in decoder.feed(&String::from_utf8_lossy(&bytes)) {
                        for event in parse_frame(frame) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if let Some(frame) = decoder.finish() {
                        for event in parse_frame(frame) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

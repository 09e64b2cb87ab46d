//! Server-sent-event framing shared by the vendor decoders.
//!
//! `SseStream` turns raw body bytes into `data:` payloads and hands each one
//! to a vendor `StreamDecoder`. `ToolCallAssembler` is the per-call buffer
//! both decoders use to stitch tool-call arguments back together.

use std::collections::BTreeMap;

use diskdoc_core::provider::{StreamErrorKind, StreamEvent};
use diskdoc_core::tool::ToolCall;
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// Hard cap on a single SSE line. Longer records abort the stream.
pub const MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

/// Vendor-specific translation of SSE payloads into `StreamEvent`s.
///
/// A decoder signals the end of its stream by returning `StreamEvent::Done`
/// or `StreamEvent::Error`; nothing is fed to it afterwards.
pub trait StreamDecoder: Send {
    /// Decode one `data:` payload (prefix already stripped).
    fn decode(&mut self, data: &str) -> Vec<StreamEvent>;

    /// The body ended without a terminal event. Finalize what is pending
    /// and return the closing events.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Line framing around a `StreamDecoder`.
#[derive(Debug)]
pub struct SseStream<D> {
    decoder: D,
    buffer: Vec<u8>,
    max_record: usize,
    finished: bool,
}

impl<D: StreamDecoder> SseStream<D> {
    pub fn new(decoder: D) -> Self {
        Self::with_max_record(decoder, MAX_RECORD_BYTES)
    }

    pub fn with_max_record(decoder: D, max_record: usize) -> Self {
        Self {
            decoder,
            buffer: Vec::new(),
            max_record,
            finished: false,
        }
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk of body bytes and return the events decoded from every
    /// line it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            if newline > self.max_record {
                return self.abort(events);
            }
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.process_line(&line[..newline], &mut events);
            if self.finished {
                self.buffer.clear();
                return events;
            }
        }

        if self.buffer.len() > self.max_record {
            return self.abort(events);
        }
        events
    }

    /// The body is exhausted. Decodes a trailing unterminated line, then
    /// lets the decoder close out.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.process_line(&rest, &mut events);
        }
        if !self.finished {
            events.extend(self.decoder.finish());
            self.finished = true;
        }
        events
    }

    fn abort(&mut self, mut events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        self.buffer.clear();
        self.finished = true;
        events.push(StreamEvent::Error(StreamErrorKind::RecordTooLarge {
            limit: self.max_record,
        }));
        events
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        let Some(data) = line.strip_prefix("data:") else {
            if !line.is_empty() {
                trace!(line = %line, "Skipping non-data SSE line");
            }
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.is_empty() {
            return;
        }

        for event in self.decoder.decode(data) {
            let terminal = matches!(event, StreamEvent::Done | StreamEvent::Error(_));
            events.push(event);
            if terminal {
                self.finished = true;
                return;
            }
        }
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
    /// Values merged in directly rather than through argument text.
    merged: Map<String, Value>,
    /// The last successful parse of `arguments`.
    parsed: Option<Map<String, Value>>,
    /// Whether `parsed` reflects the full current `arguments`.
    parsed_current: bool,
}

/// Accumulates tool-call declarations and argument fragments, keyed by the
/// vendor's call index.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, index: u32) -> bool {
        self.pending.contains_key(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Create the entry for `index` if needed and record whichever of
    /// `id`/`name` are non-empty. Known values are kept when the new one is
    /// empty.
    pub fn declare(&mut self, index: u32, id: &str, name: &str) {
        let entry = self.pending.entry(index).or_default();
        if !id.is_empty() {
            entry.id = id.to_string();
        }
        if !name.is_empty() {
            entry.name = name.to_string();
        }
    }

    /// Fill `id`/`name` only where the entry has none yet.
    pub fn fill_missing(&mut self, index: u32, id: &str, name: &str) {
        let entry = self.pending.entry(index).or_default();
        if entry.id.is_empty() {
            entry.id = id.to_string();
        }
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
    }

    /// Append an argument fragment and re-parse the whole accumulated text.
    /// Returns `false` when nothing is pending at `index`.
    pub fn append_arguments(&mut self, index: u32, fragment: &str) -> bool {
        let Some(entry) = self.pending.get_mut(&index) else {
            return false;
        };
        entry.arguments.push_str(fragment);
        match serde_json::from_str::<Map<String, Value>>(&entry.arguments) {
            Ok(parsed) => {
                entry.parsed = Some(parsed);
                entry.parsed_current = true;
            }
            Err(_) => entry.parsed_current = false,
        }
        true
    }

    /// Merge already-decoded input values into the entry at `index`.
    pub fn merge_input(&mut self, index: u32, input: Map<String, Value>) {
        if let Some(entry) = self.pending.get_mut(&index) {
            entry.merged.extend(input);
        }
    }

    /// Finalize the call at `index`. Calls lacking an id or a name are
    /// dropped.
    pub fn complete(&mut self, index: u32) -> Option<ToolCall> {
        let entry = self.pending.remove(&index)?;
        Self::finalize(index, entry)
    }

    /// Finalize every pending call in index order.
    pub fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|(index, entry)| Self::finalize(index, entry))
            .collect()
    }

    fn finalize(index: u32, entry: PendingToolCall) -> Option<ToolCall> {
        if entry.id.is_empty() || entry.name.is_empty() {
            warn!(
                index,
                id = %entry.id,
                name = %entry.name,
                "Dropping tool call without id or name"
            );
            return None;
        }
        if !entry.arguments.is_empty() && !entry.parsed_current {
            warn!(
                tool = %entry.name,
                arguments = %entry.arguments,
                "Tool call arguments are not a complete JSON object; using last parsed input"
            );
        }

        let mut input = entry.merged;
        if let Some(parsed) = entry.parsed {
            input.extend(parsed);
        }
        Some(ToolCall {
            id: entry.id,
            name: entry.name,
            input,
        })
    }
}

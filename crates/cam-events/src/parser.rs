use memchr::memchr;
use regex::Regex;
use tracing::{debug, warn};

use crate::event::{EventKind, MotionEvent};

/// Hard safety cap on the accumulation buffer. If trimming fails to keep up
/// the buffer is cleared outright, trading event loss for bounded memory.
const MAX_BUFFER_LEN: usize = 100_000;

/// Multipart part separator used by camera event endpoints.
const BOUNDARY_MARKER: &str = "--";

/// Incremental parser over a never-ending multipart event response.
///
/// Chunks are appended to a growing text buffer; after every append the
/// buffer is scanned for complete `Code=<type>;action=<action>;index=<n>`
/// records. The consumed prefix is trimmed after each scan so the buffer
/// only retains the unconsumed tail of the current part.
///
/// The trimming is best-effort: pathological input can keep stale partial
/// records around until the hard cap clears the buffer.
pub struct EventStreamParser {
    buffer: String,
    record: Regex,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            record: Regex::new(r"Code=([A-Za-z0-9]+);action=([A-Za-z]+);index=(\d+)")
                .expect("event record pattern is valid"),
        }
    }

    /// Append a chunk and return every motion-relevant event completed by it.
    ///
    /// Event types outside the motion-relevant set are parsed and discarded.
    /// The zero-based wire index is translated to a one-based channel id,
    /// and `action` is matched case-insensitively (`start` means active).
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<MotionEvent> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        let mut consumed_to = 0;
        for caps in self.record.captures_iter(&self.buffer) {
            let whole = caps.get(0).expect("match always has group 0");
            consumed_to = whole.end();

            let kind = EventKind::parse(&caps[1]);
            let active = caps[2].eq_ignore_ascii_case("start");
            // index on the wire is zero-based, channels are one-based
            let Ok(index) = caps[3].parse::<u32>() else {
                debug!(record = &caps[0], "event index out of range, skipping");
                continue;
            };

            if kind.is_motion() {
                events.push(MotionEvent {
                    channel: index.saturating_add(1),
                    kind,
                    active,
                });
            } else {
                debug!(code = %kind, "ignoring non-motion event");
            }
        }

        if consumed_to > 0 {
            self.trim_consumed(consumed_to);
        }

        if self.buffer.len() > MAX_BUFFER_LEN {
            warn!(
                len = self.buffer.len(),
                "event buffer exceeded safety cap, clearing"
            );
            self.buffer.clear();
        }

        events
    }

    /// Drop everything up to the last recognized record, retaining the tail
    /// that begins at the nearest following boundary marker or newline.
    fn trim_consumed(&mut self, last_record_end: usize) {
        let tail = &self.buffer[last_record_end..];
        let boundary = tail.find(BOUNDARY_MARKER);
        let newline = memchr(b'\n', tail.as_bytes());
        let keep_from = match (boundary, newline) {
            (Some(b), Some(n)) => last_record_end + b.min(n),
            (Some(b), None) => last_record_end + b,
            (None, Some(n)) => last_record_end + n,
            (None, None) => last_record_end,
        };
        self.buffer.drain(..keep_from);
    }

    /// Bytes currently retained in the accumulation buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_motion_record() {
        let mut parser = EventStreamParser::new();
        let events = parser.push_chunk("Code=VideoMotion;action=Start;index=4");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            MotionEvent {
                channel: 5,
                kind: EventKind::VideoMotion,
                active: true,
            }
        );
    }

    #[test]
    fn test_unsupported_type_is_discarded() {
        let mut parser = EventStreamParser::new();
        let events = parser.push_chunk("Code=VideoLoss;action=Start;index=0");
        assert!(events.is_empty());
    }

    #[test]
    fn test_action_stop_is_inactive() {
        let mut parser = EventStreamParser::new();
        let events = parser.push_chunk("Code=CrossLineDetection;action=stop;index=0");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, 1);
        assert!(!events[0].active);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut parser = EventStreamParser::new();
        assert!(
            parser
                .push_chunk("--myboundary\r\nCode=AlarmLocal;act")
                .is_empty()
        );
        // unconsumed suffix must have been retained
        assert!(parser.buffered_len() > 0);

        let events = parser.push_chunk("ion=Start;index=1\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AlarmLocal);
        assert_eq!(events[0].channel, 2);
    }

    #[test]
    fn test_multiple_records_in_one_chunk() {
        let mut parser = EventStreamParser::new();
        let events = parser.push_chunk(
            "Code=VideoMotion;action=Start;index=0\r\n--bnd\r\nCode=VideoMotion;action=Stop;index=0\r\n",
        );
        assert_eq!(events.len(), 2);
        assert!(events[0].active);
        assert!(!events[1].active);
    }

    #[test]
    fn test_consumed_records_are_trimmed() {
        let mut parser = EventStreamParser::new();
        parser.push_chunk("Code=VideoMotion;action=Start;index=0\r\n");
        // everything before the trailing newline is consumed
        assert!(parser.buffered_len() <= 2);

        // already-consumed records are never re-emitted
        let events = parser.push_chunk("Code=VideoMotion;action=Stop;index=0\r\n");
        assert_eq!(events.len(), 1);
        assert!(!events[0].active);
    }

    #[test]
    fn test_safety_cap_clears_buffer() {
        let mut parser = EventStreamParser::new();
        // garbage with no records and no boundaries accumulates
        let junk = "x".repeat(60_000);
        parser.push_chunk(&junk);
        assert_eq!(parser.buffered_len(), 60_000);
        parser.push_chunk(&junk);
        assert_eq!(parser.buffered_len(), 0);
    }
}

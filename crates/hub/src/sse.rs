//! Incremental `text/event-stream` decoder.

#![forbid(unsafe_code)]

use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::Serialize;

/// Default upper bound for one unterminated line or one assembled event.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SseError {
    #[error("event stream line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },
    #[error("event stream event exceeds {limit} bytes")]
    EventTooLarge { limit: usize },
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Feeds arbitrary byte chunks and yields complete events. Lines may be split
/// across chunks; `\n`, `\r\n` and `\r` are all accepted as terminators.
#[derive(Debug)]
pub struct SseDecoder {
    buf: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    max_event_bytes: usize,
    last_id: Option<String>,
    retry: Option<Duration>,
    /// Previous chunk ended on '\r'; swallow a leading '\n'.
    pending_cr: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self { Self::default() }

    /// Decoder that fails once a line or an event grows past `max_event_bytes`.
    pub fn with_limit(max_event_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            max_event_bytes: max_event_bytes.max(1),
            last_id: None,
            retry: None,
            pending_cr: false,
        }
    }

    /// Most recent `retry:` value seen, if any.
    pub fn retry(&self) -> Option<Duration> { self.retry }

    /// Feed one chunk. Fails, and drops everything buffered, when a line or
    /// an event outgrows the decoder's limit; the caller should reconnect.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SseError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            if self.pending_cr && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.pending_cr = false;
            }
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') else { break };
            let line = self.buf.split_to(pos);
            let term = self.buf[0];
            self.buf.advance(1);
            if term == b'\r' {
                if self.buf.is_empty() {
                    self.pending_cr = true;
                } else if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(ev) = self.line(&line) {
                out.push(ev);
            }
            if self.data_len > self.max_event_bytes {
                self.reset();
                return Err(SseError::EventTooLarge { limit: self.max_event_bytes });
            }
        }
        if self.buf.len() > self.max_event_bytes {
            self.reset();
            return Err(SseError::LineTooLong { limit: self.max_event_bytes });
        }
        Ok(out)
    }

    /// Connection ended: drop any partially assembled event.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.event = None;
        self.data.clear();
        self.data_len = 0;
        self.pending_cr = false;
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(SseEvent {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_event_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"event: st").unwrap().is_empty());
        assert!(d.push(b"ate\ndata: {\"a\":").unwrap().is_empty());
        let evs = d.push(b"1}\n\n").unwrap();
        assert_eq!(evs, vec![SseEvent { event: "state".into(), data: "{\"a\":1}".into(), id: None }]);
    }

    #[test]
    fn comments_and_retry() {
        let mut d = SseDecoder::new();
        let evs = d.push(b": keep-alive\n\nretry: 1500\n\n").unwrap();
        assert!(evs.is_empty());
        assert_eq!(d.retry(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn multi_line_data_and_crlf() {
        let mut d = SseDecoder::new();
        let mut evs = d.push(b"data: a\r").unwrap();
        evs.extend(d.push(b"\ndata: b\r\n\r\n").unwrap());
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].event, "message");
        assert_eq!(evs[0].data, "a\nb");
    }

    #[test]
    fn reset_drops_partial_event() {
        let mut d = SseDecoder::new();
        d.push(b"event: state\ndata: x\n").unwrap();
        d.reset();
        assert!(d.push(b"\n").unwrap().is_empty());
    }

    #[test]
    fn unterminated_line_past_limit_fails() {
        let mut d = SseDecoder::with_limit(16);
        assert!(d.push(b"data: 0123456").unwrap().is_empty());
        assert_eq!(d.push(b"789abcdef"), Err(SseError::LineTooLong { limit: 16 }));
        // buffer was dropped; the decoder is usable again
        let evs = d.push(b"data: ok\n\n").unwrap();
        assert_eq!(evs[0].data, "ok");
    }

    #[test]
    fn event_past_limit_fails() {
        let mut d = SseDecoder::with_limit(16);
        assert!(d.push(b"data: 0123456789\n").unwrap().is_empty());
        assert_eq!(d.push(b"data: 0123456789\n"), Err(SseError::EventTooLarge { limit: 16 }));
        assert!(d.push(b"\n").unwrap().is_empty());
    }
}

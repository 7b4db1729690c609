//! Frame extraction from charge-station communication logs
//!
//! Logs interleave human-readable lines with hex dumps. One segmentation
//! rule applies everywhere: a timestamp line starts a new frame (closing
//! the previous one), a line containing the frame-start marker switches
//! the frame to collecting (dropping any prefix before the marker), and
//! every following line is appended until the next timestamp line.
//!
//! [`batch`] applies the rule to a whole source read once; [`stream`]
//! applies it to an incrementally fed live source with a two-header
//! lookahead.

pub mod batch;
pub mod stream;

pub use batch::{extract_from_file, extract_from_reader, FrameIter};
pub use stream::StreamExtractor;

use chrono::NaiveDateTime;
use log::debug;
use regex::Regex;
use std::str::FromStr;

use crate::types::{DecoderError, Direction, Frame, Result};

/// Matches log timestamps like `2024-05-23 13:32:09.123`; the millisecond
/// separator varies between `.` and `:` across firmware versions, with 2
/// or 3 digits.
const TIMESTAMP_PATTERN: &str = r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}[.:]\d{2,3}";

const DIRECTION_PATTERN: &str = r"(?i)(Send|Recv|TX|RX)";

/// Bracketed terminal id, e.g. the `3` in `[3] ccucom: ...`
const TERMINAL_ID_PATTERN: &str = r"\[(\d+)\]\s+\w+.*?:";

#[derive(Debug)]
struct PendingFrame {
    timestamp: String,
    direction: Option<Direction>,
    terminal_id: Option<u32>,
    parts: Vec<String>,
}

/// Line-driven segmentation state machine shared by both extractors
#[derive(Debug)]
pub struct FrameAssembler {
    timestamp_re: Regex,
    frame_head_re: Regex,
    direction_re: Regex,
    terminal_id_re: Regex,
    current: Option<PendingFrame>,
    collecting: bool,
}

impl FrameAssembler {
    /// `frame_head_pattern` is a regex matched against log lines to find
    /// where hex payload collection starts, e.g. `"AA 55"`.
    pub fn new(frame_head_pattern: &str) -> Result<Self> {
        let frame_head_re = Regex::new(frame_head_pattern).map_err(|e| {
            DecoderError::Framing(format!(
                "bad frame head pattern '{}': {}",
                frame_head_pattern, e
            ))
        })?;
        Ok(Self {
            timestamp_re: Regex::new(TIMESTAMP_PATTERN).expect("timestamp pattern"),
            frame_head_re,
            direction_re: Regex::new(DIRECTION_PATTERN).expect("direction pattern"),
            terminal_id_re: Regex::new(TERMINAL_ID_PATTERN).expect("terminal id pattern"),
            current: None,
            collecting: false,
        })
    }

    /// Feed one log line; returns the previous frame when this line
    /// closes it.
    pub fn push_line(&mut self, line: &str) -> Option<Frame> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return None;
        }

        if let Some(ts_match) = self.timestamp_re.find(line) {
            let closed = self.take_current();

            let direction = self
                .direction_re
                .find(line)
                .and_then(|m| Direction::from_str(m.as_str()).ok());
            let terminal_id = self
                .terminal_id_re
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());

            self.current = Some(PendingFrame {
                timestamp: ts_match.as_str().to_string(),
                direction,
                terminal_id,
                parts: Vec::new(),
            });
            self.collecting = false;
            return closed;
        }

        let line = match self.frame_head_re.find(line) {
            Some(head) => {
                self.collecting = true;
                &line[head.start()..]
            }
            None => line,
        };

        if self.collecting {
            if let Some(frame) = &mut self.current {
                frame.parts.push(line.to_string());
            }
        }
        None
    }

    /// Close and return the trailing open frame, if it collected anything
    pub fn finish(&mut self) -> Option<Frame> {
        self.collecting = false;
        self.take_current()
    }

    /// Whether the text contains a frame-opening timestamp header
    pub fn contains_header(&self, text: &str) -> bool {
        self.timestamp_re.is_match(text)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.collecting = false;
    }

    /// Frames that never collected payload are discarded
    fn take_current(&mut self) -> Option<Frame> {
        let pending = self.current.take()?;
        if pending.parts.is_empty() {
            debug!("dropping empty frame at {}", pending.timestamp);
            return None;
        }
        Some(Frame {
            timestamp: pending.timestamp,
            direction: pending.direction,
            terminal_id: pending.terminal_id,
            hex_text: pending.parts.join(" "),
        })
    }
}

/// Parse a log timestamp into a naive datetime, tolerating both
/// millisecond separators.
pub fn parse_log_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.len() < 19 {
        return None;
    }
    let mut normalized = text.to_string();
    if normalized.len() > 19 && normalized.as_bytes()[19] == b':' {
        normalized.replace_range(19..20, ".");
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

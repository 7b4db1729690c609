//! Streaming extraction for live sources fed in arbitrary chunks
//!
//! Chunk boundaries carry no meaning: a frame header or hex line may be
//! split across feeds. The extractor buffers the trailing partial line and
//! only emits a frame once a later timestamp header proves it complete —
//! the newest header is always held back until more input or [`flush`]
//! decides its fate.
//!
//! [`flush`]: StreamExtractor::flush

use crate::extract::FrameAssembler;
use crate::types::{Frame, Result};

/// Incremental frame extractor with two-header lookahead
#[derive(Debug)]
pub struct StreamExtractor {
    assembler: FrameAssembler,
    /// Text after the last newline seen, carried across feeds
    partial: String,
}

impl StreamExtractor {
    pub fn new(frame_head_pattern: &str) -> Result<Self> {
        Ok(Self {
            assembler: FrameAssembler::new(frame_head_pattern)?,
            partial: String::new(),
        })
    }

    /// Feed a chunk of log text, returning every frame completed by it
    ///
    /// Whole lines are processed immediately; the remainder stays
    /// buffered. The open frame is emitted as soon as a subsequent
    /// timestamp header shows up anywhere in the buffer, even when that
    /// header's line has no newline yet.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.partial.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(frame) = self.assembler.push_line(line) {
                frames.push(frame);
            }
        }

        // A header visible in the trailing partial line already proves
        // the open frame complete; the partial line itself stays
        // buffered and opens the next frame once it completes.
        if self.assembler.contains_header(&self.partial) {
            if let Some(frame) = self.assembler.finish() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Force the trailing buffer out as a best-effort final frame
    pub fn flush(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.partial);

        let mut frames = Vec::new();
        if !rest.trim().is_empty() {
            if let Some(frame) = self.assembler.push_line(rest.trim()) {
                frames.push(frame);
            }
        }
        if let Some(frame) = self.assembler.finish() {
            frames.push(frame);
        }
        frames
    }

    /// Drop all buffered state, e.g. after a connection reset
    pub fn reset(&mut self) {
        self.partial.clear();
        self.assembler.reset();
    }

    /// Bytes of text currently buffered past the last complete line
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

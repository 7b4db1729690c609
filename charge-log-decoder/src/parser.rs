//! Record parser: turns extracted frames into decoded records
//!
//! Orchestrates the per-frame pipeline: hex text → bytes, header decode
//! against the schema's head fields, command alias remapping, filters,
//! layout lookup, payload decode. Every frame ends in exactly one
//! terminal state; payload decode failures are recovered into the record
//! rather than aborting the batch.

use chrono::NaiveDateTime;
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::codec::{read_uint_raw, FieldCodec};
use crate::extract::parse_log_timestamp;
use crate::schema::{HeaderFieldKind, ProtocolConfig};
use crate::types::{
    hex_upper, parse_hex_text, Frame, ParsedRecord, RecordStatus, Value, ValueMap,
};

/// Header field that carries the command id
const CMD_FIELD: &str = "cmd";

/// Progress callbacks fire every this many frames, plus once at the end
const PROGRESS_INTERVAL: usize = 64;

/// Terminal state of one frame plus the record it produced, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: RecordStatus,
    pub record: Option<ParsedRecord>,
}

impl Outcome {
    fn dropped(status: RecordStatus) -> Self {
        Self {
            status,
            record: None,
        }
    }
}

/// Aggregate counts over one `parse_many` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub total: usize,
    pub success: usize,
    pub filtered_out: usize,
    pub header_mismatch: usize,
    pub command_unsupported: usize,
    /// Recovered payload decode failures
    pub errors: usize,
    /// Decoded records per command id, counting recovered records too
    pub cmd_counts: HashMap<u32, usize>,
}

impl ParseStats {
    fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome.status {
            RecordStatus::Success => self.success += 1,
            RecordStatus::FilteredOut => self.filtered_out += 1,
            RecordStatus::HeaderMismatch => self.header_mismatch += 1,
            RecordStatus::CommandUnsupported => self.command_unsupported += 1,
            RecordStatus::DecodeError => self.errors += 1,
        }
        if let Some(record) = &outcome.record {
            *self.cmd_counts.entry(record.cmd).or_insert(0) += 1;
        }
    }
}

/// Frame-to-record orchestrator for one protocol
#[derive(Debug, Clone)]
pub struct RecordParser {
    config: Arc<ProtocolConfig>,
    codec: FieldCodec,
    include_cmds: Option<HashSet<u32>>,
    exclude_cmds: Option<HashSet<u32>>,
    time_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl RecordParser {
    pub fn new(config: Arc<ProtocolConfig>) -> Self {
        Self {
            codec: FieldCodec::new(Arc::clone(&config)),
            config,
            include_cmds: None,
            exclude_cmds: None,
            time_range: None,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Set or clear the command and time filters
    ///
    /// An include list wins over an exclude list when both are set.
    pub fn set_filters(
        &mut self,
        include_cmds: Option<HashSet<u32>>,
        exclude_cmds: Option<HashSet<u32>>,
        time_range: Option<(NaiveDateTime, NaiveDateTime)>,
    ) {
        self.include_cmds = include_cmds;
        self.exclude_cmds = exclude_cmds;
        self.time_range = time_range;
    }

    /// Parse one frame to its terminal state
    pub fn parse_frame(&self, frame: &Frame) -> Outcome {
        let bytes = match parse_hex_text(&frame.hex_text) {
            Some(bytes) => bytes,
            None => {
                debug!("unparseable hex at {}, dropping frame", frame.timestamp);
                return Outcome::dropped(RecordStatus::HeaderMismatch);
            }
        };

        let head_len = self.config.framing.head_len;
        if bytes.len() < head_len {
            return Outcome::dropped(RecordStatus::HeaderMismatch);
        }

        let header = match self.decode_header(&bytes[..head_len]) {
            Some(header) => header,
            // Const mismatch on a required field: resync noise, not an error
            None => return Outcome::dropped(RecordStatus::HeaderMismatch),
        };

        let cmd_raw = match header.get(CMD_FIELD).and_then(Value::as_u64) {
            Some(cmd) => cmd as u32,
            None => return Outcome::dropped(RecordStatus::HeaderMismatch),
        };
        let cmd = self.config.resolve_cmd(cmd_raw);

        if !self.cmd_passes(cmd) || !self.time_passes(&frame.timestamp) {
            return Outcome::dropped(RecordStatus::FilteredOut);
        }

        let layout = match self.config.layout(cmd) {
            Ok(layout) => layout,
            Err(_) => return Outcome::dropped(RecordStatus::CommandUnsupported),
        };

        let tail_len = self.config.framing.tail_len;
        let content_end = bytes.len().saturating_sub(tail_len).max(head_len);
        let payload = &bytes[head_len..content_end];

        let (status, content, parse_error) = match self.codec.decode(payload, layout) {
            Ok(content) => (RecordStatus::Success, content, None),
            Err(e) => {
                error!("cmd {} payload decode failed: {}", cmd, e);
                let mut raw = ValueMap::new();
                raw.insert("raw", Value::Str(hex_upper(payload)));
                (RecordStatus::DecodeError, raw, Some(e.to_string()))
            }
        };

        Outcome {
            status,
            record: Some(ParsedRecord {
                timestamp: frame.timestamp.clone(),
                direction: frame.direction,
                terminal_id: frame.terminal_id,
                raw_hex: frame.hex_text.clone(),
                header,
                cmd,
                content,
                parse_error,
            }),
        }
    }

    /// Parse a batch of frames, keeping every emitted record
    pub fn parse_many(&self, frames: &[Frame]) -> (Vec<ParsedRecord>, ParseStats) {
        self.parse_many_with(frames, |_, _| {}, || false)
    }

    /// Parse a batch with a progress callback and a cooperative stop check
    ///
    /// `progress` receives `(processed, total)` periodically and once at
    /// the end; `should_stop` is polled between frames, and stopping keeps
    /// everything decoded so far.
    pub fn parse_many_with<P, S>(
        &self,
        frames: &[Frame],
        mut progress: P,
        should_stop: S,
    ) -> (Vec<ParsedRecord>, ParseStats)
    where
        P: FnMut(usize, usize),
        S: Fn() -> bool,
    {
        let total = frames.len();
        let mut records = Vec::new();
        let mut stats = ParseStats::default();

        for (index, frame) in frames.iter().enumerate() {
            if should_stop() {
                debug!("stop requested after {} of {} frames", index, total);
                break;
            }
            if index % PROGRESS_INTERVAL == 0 {
                progress(index, total);
            }

            let outcome = self.parse_frame(frame);
            stats.record(&outcome);
            if let Some(record) = outcome.record {
                records.push(record);
            }
        }
        progress(stats.total, total);

        debug!(
            "parsed {} frames: {} ok, {} recovered, {} filtered, {} unsupported, {} bad headers",
            stats.total,
            stats.success,
            stats.errors,
            stats.filtered_out,
            stats.command_unsupported,
            stats.header_mismatch
        );
        (records, stats)
    }

    /// Decode the fixed-offset header fields; `None` drops the frame
    fn decode_header(&self, head: &[u8]) -> Option<ValueMap> {
        let mut header = ValueMap::new();

        for field in &self.config.head_fields {
            let slice = match head.get(field.offset..field.offset + field.length) {
                Some(slice) => slice,
                // Fields past the head are skipped, not fatal
                None => continue,
            };

            let value = match &field.kind {
                HeaderFieldKind::Uint => Value::UInt(read_uint_raw(slice, field.endian)),
                HeaderFieldKind::Const { expected } => {
                    let value = read_uint_raw(slice, field.endian);
                    if value != *expected && field.required {
                        debug!(
                            "header '{}': got 0x{:X}, expected 0x{:X}",
                            field.name, value, expected
                        );
                        return None;
                    }
                    Value::UInt(value)
                }
                HeaderFieldKind::Hex => Value::Str(hex_upper(slice)),
                HeaderFieldKind::Ascii => {
                    let end = slice.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    Value::Str(String::from_utf8_lossy(&slice[..end]).into_owned())
                }
            };
            header.insert(field.name.clone(), value);
        }

        Some(header)
    }

    fn cmd_passes(&self, cmd: u32) -> bool {
        if let Some(include) = &self.include_cmds {
            return include.contains(&cmd);
        }
        if let Some(exclude) = &self.exclude_cmds {
            return !exclude.contains(&cmd);
        }
        true
    }

    /// Unparseable frame timestamps pass the filter
    fn time_passes(&self, timestamp: &str) -> bool {
        let Some((start, end)) = self.time_range else {
            return true;
        };
        match parse_log_timestamp(timestamp) {
            Some(ts) => start <= ts && ts <= end,
            None => true,
        }
    }
}

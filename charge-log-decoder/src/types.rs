//! Core types for the charge log decoder library
//!
//! This module defines the values the codec emits, the frames the extractor
//! produces, the records the parser assembles from both, and the error
//! taxonomy shared across the crate.

use std::fmt;
use std::str::FromStr;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur while loading schemas or decoding frames
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Command {0} not found in protocol")]
    UnknownCommand(u32),

    #[error("Unsupported integer width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Unknown enum '{0}'")]
    UnknownEnum(String),

    #[error("Repeat count field '{0}' not found in context")]
    MissingContextField(String),

    #[error("Invalid BCD byte: 0x{0:02X}")]
    InvalidBcd(u8),

    #[error("Invalid time data: {0}")]
    InvalidTimeData(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transfer direction captured from a log line, best-effort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
    Tx,
    Rx,
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "send" => Ok(Direction::Send),
            "recv" => Ok(Direction::Recv),
            "tx" => Ok(Direction::Tx),
            "rx" => Ok(Direction::Rx),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "Send"),
            Direction::Recv => write!(f, "Recv"),
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

/// One extracted message frame: a timestamped block of hex text plus
/// best-effort direction and terminal metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Timestamp text as it appeared in the log line
    pub timestamp: String,
    /// Send/Recv/TX/RX, when the header line carried one
    pub direction: Option<Direction>,
    /// Bracketed terminal id, e.g. the `3` in `[3] ccucom: ...`
    pub terminal_id: Option<u32>,
    /// Collected hex payload text (whitespace-separated byte pairs)
    pub hex_text: String,
}

/// A decoded field value
///
/// Decoding never loses the distinction between "absent" and "zero":
/// a field whose bytes ran out is `Value::Missing`, not dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned integer (uint fields, bitfield slices)
    UInt(u64),
    /// Signed integer (int fields)
    Int(i64),
    /// Scaled value, rounded to the scale's precision
    Float(f64),
    /// String-rendered value (str/hex/bcd/time fields)
    Str(String),
    /// Single bit from a bitset
    Bool(bool),
    /// Enum-mapped integer, keeps both the raw value and its label
    Enum { value: i64, name: String },
    /// Nested map (bitset/bitfield results, single-repeat groups)
    Map(ValueMap),
    /// Repeated group iterations
    List(Vec<ValueMap>),
    /// Missing-data sentinel: the buffer ended before this field
    Missing,
}

impl Value {
    /// Raw integer view, used to resolve dynamic repeat counts
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Int(v) => Some(*v),
            Value::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Enum { value, name } => write!(f, "{} ({})", value, name),
            Value::Map(m) => write!(f, "{{{} fields}}", m.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Missing => write!(f, "<missing>"),
        }
    }
}

/// Insertion-ordered name → value map
///
/// Field order in decoded output mirrors field order in the schema, so
/// this keeps entries in insertion order rather than hashing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueMap {
    entries: Vec<(String, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any existing entry with the same name
    /// (the replacement keeps its original position).
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Merge all entries of another map into this one
    pub fn extend(&mut self, other: ValueMap) {
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

/// Terminal state of one frame after the record parser has seen it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Header and payload both decoded
    Success,
    /// Dropped by a command or time filter, silently
    FilteredOut,
    /// Too short for the header, bad hex, or a failed const check
    HeaderMismatch,
    /// Header decoded but the command has no layout in the schema
    CommandUnsupported,
    /// Payload decode failed; the record is still emitted with raw hex
    DecodeError,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Success => write!(f, "SUCCESS"),
            RecordStatus::FilteredOut => write!(f, "FILTERED_OUT"),
            RecordStatus::HeaderMismatch => write!(f, "HEADER_MISMATCH"),
            RecordStatus::CommandUnsupported => write!(f, "COMMAND_UNSUPPORTED"),
            RecordStatus::DecodeError => write!(f, "DECODE_ERROR"),
        }
    }
}

/// A fully parsed record: one frame's header and payload, decoded
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub timestamp: String,
    pub direction: Option<Direction>,
    pub terminal_id: Option<u32>,
    /// Original hex text of the frame, kept for display and debugging
    pub raw_hex: String,
    /// Decoded header fields
    pub header: ValueMap,
    /// Command id after alias remapping
    pub cmd: u32,
    /// Decoded payload, or `{ raw: HEX }` when decoding failed
    pub content: ValueMap,
    /// Set when payload decoding failed and the record was recovered
    pub parse_error: Option<String>,
}

/// Render bytes as uppercase hex without separators
pub fn hex_upper(data: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Parse whitespace-separated (or contiguous) hex text into bytes
///
/// Returns `None` on odd-length tokens or non-hex characters.
pub fn parse_hex_text(text: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in text.split_whitespace() {
        if token.len() % 2 != 0 {
            return None;
        }
        for i in (0..token.len()).step_by(2) {
            let pair = token.get(i..i + 2)?;
            bytes.push(u8::from_str_radix(pair, 16).ok()?);
        }
    }
    Some(bytes)
}

//! In-memory protocol schema model
//!
//! One `ProtocolConfig` describes one protocol variant: its named types,
//! enums, per-command field layouts, and the framing descriptor used to
//! locate and slice the header. Configs are built by the loader, validated
//! once, and shared read-only afterwards.

use serde::Deserialize;
use std::collections::HashMap;

use crate::types::{DecoderError, Result};

/// Byte order for multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Endian {
    #[serde(rename = "LE", alias = "le", alias = "little")]
    Little,
    #[serde(rename = "BE", alias = "be", alias = "big")]
    Big,
}

/// Bit numbering inside a bitfield container
///
/// Kept separate from [`Endian`]: byte order and bit order are
/// independent axes of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum BitOrder {
    #[default]
    #[serde(rename = "lsb0")]
    Lsb0,
    #[serde(rename = "msb0")]
    Msb0,
}

/// Declared string encoding for `str` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum StrEncoding {
    #[default]
    #[serde(rename = "ASCII", alias = "ascii")]
    Ascii,
    #[serde(rename = "UTF-8", alias = "utf8", alias = "UTF8")]
    Utf8,
}

/// Base kind of a declared type — the codec dispatches on this tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BaseType {
    #[serde(rename = "uint")]
    Uint,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "hex")]
    Hex,
    #[serde(rename = "bcd")]
    Bcd,
    #[serde(rename = "time.cp56time2a")]
    TimeCp56Time2a,
    #[serde(rename = "time.bcd7")]
    TimeBcd7,
    #[serde(rename = "time.bcd8")]
    TimeBcd8,
    #[serde(rename = "time.bin7")]
    TimeBin7,
    #[serde(rename = "time.unix")]
    TimeUnix,
    #[serde(rename = "time.unix_ms")]
    TimeUnixMs,
    #[serde(rename = "bitset")]
    Bitset,
    #[serde(rename = "bitfield")]
    Bitfield,
}

/// A single named bit in a bitset type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BitDef {
    pub name: String,
}

/// A named sub-region of a bitfield value
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BitfieldGroup {
    pub name: String,
    pub start_bit: u32,
    pub width: u32,
    /// Optional enum reference for rendering the sliced value
    #[serde(rename = "enum")]
    pub enum_ref: Option<String>,
}

/// A declared type: base kind plus the parameters that kind needs
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub base: BaseType,
    /// Container width for bitfield types
    pub bytes: Option<usize>,
    pub signed: Option<bool>,
    pub encoding: Option<StrEncoding>,
    /// Ordered bit descriptors for bitset types
    pub bits: Option<Vec<BitDef>>,
    /// Sub-region descriptors for bitfield types
    pub groups: Option<Vec<BitfieldGroup>>,
    pub order: BitOrder,
}

/// Integer → label mapping
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumDef {
    pub values: HashMap<i64, String>,
}

impl EnumDef {
    pub fn label(&self, value: i64) -> Option<&str> {
        self.values.get(&value).map(String::as_str)
    }
}

/// One field in a command layout
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Field {
    /// Field length in bytes
    pub len: usize,
    pub name: String,
    /// Name of a declared type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Stable id: the decoded raw value is stored in the frame context
    /// under this id so later groups can reference it
    #[serde(default)]
    pub id: Option<String>,
    /// Multiplier applied to numeric results
    #[serde(default)]
    pub scale: Option<f64>,
    /// Overrides the schema default byte order
    #[serde(default)]
    pub endian: Option<Endian>,
    /// Name of a declared enum applied to integer results
    #[serde(default, rename = "enum")]
    pub enum_ref: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A repeating run of fields
///
/// Exactly one of `repeat_const` / `repeat_by` is set; the loader rejects
/// anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub repeat_const: Option<usize>,
    /// Field id whose decoded value supplies the repeat count
    pub repeat_by: Option<String>,
    pub fields: Vec<FieldItem>,
}

/// One entry in a command layout: a plain field or a repeating group
#[derive(Debug, Clone, PartialEq)]
pub enum FieldItem {
    Field(Field),
    Group(Group),
}

/// Protocol metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub protocol: String,
    pub version: u32,
    pub default_endian: Endian,
    pub notes: Option<String>,
}

/// How a header field is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderFieldKind {
    Uint,
    /// Uint whose value must equal `expected`; a required mismatch drops
    /// the frame as resync noise
    Const { expected: u64 },
    Hex,
    Ascii,
}

/// One fixed-offset field inside the frame header
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderField {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub endian: Endian,
    pub kind: HeaderFieldKind,
    pub required: bool,
}

/// Frame geometry: fixed head/tail sizes and the frame-start marker
#[derive(Debug, Clone, PartialEq)]
pub struct Framing {
    pub head_len: usize,
    pub tail_len: usize,
    /// Regex source matched against log lines to find the frame start
    pub frame_head: String,
}

/// A complete, validated protocol definition
///
/// Immutable after loading; share it behind an `Arc` across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    pub meta: Meta,
    pub types: HashMap<String, TypeDef>,
    pub enums: HashMap<String, EnumDef>,
    pub cmds: HashMap<u32, Vec<FieldItem>>,
    pub framing: Framing,
    pub head_fields: Vec<HeaderField>,
    /// Alias command id → canonical command id
    pub cmd_aliases: HashMap<u32, u32>,
}

impl ProtocolConfig {
    /// Field layout for a command
    pub fn layout(&self, cmd_id: u32) -> Result<&[FieldItem]> {
        self.cmds
            .get(&cmd_id)
            .map(Vec::as_slice)
            .ok_or(DecoderError::UnknownCommand(cmd_id))
    }

    pub fn has_cmd(&self, cmd_id: u32) -> bool {
        self.cmds.contains_key(&cmd_id)
    }

    /// Apply the alias remap, returning the canonical command id
    pub fn resolve_cmd(&self, cmd_id: u32) -> u32 {
        self.cmd_aliases.get(&cmd_id).copied().unwrap_or(cmd_id)
    }

    pub fn type_def(&self, name: &str) -> Result<&TypeDef> {
        self.types
            .get(name)
            .ok_or_else(|| DecoderError::UnknownType(name.to_string()))
    }

    pub fn enum_def(&self, name: &str) -> Result<&EnumDef> {
        self.enums
            .get(name)
            .ok_or_else(|| DecoderError::UnknownEnum(name.to_string()))
    }

    /// All declared command ids, sorted
    pub fn supported_cmds(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.cmds.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Summary counts for logging and sanity checks
    pub fn stats(&self) -> SchemaStats {
        SchemaStats {
            num_types: self.types.len(),
            num_enums: self.enums.len(),
            num_cmds: self.cmds.len(),
        }
    }
}

/// Schema summary statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStats {
    pub num_types: usize,
    pub num_enums: usize,
    pub num_cmds: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> ProtocolConfig {
        let mut types = HashMap::new();
        types.insert(
            "uint16".to_string(),
            TypeDef {
                base: BaseType::Uint,
                bytes: Some(2),
                signed: None,
                encoding: None,
                bits: None,
                groups: None,
                order: BitOrder::Lsb0,
            },
        );

        let mut cmds = HashMap::new();
        cmds.insert(
            1,
            vec![FieldItem::Field(Field {
                len: 2,
                name: "value".to_string(),
                type_name: "uint16".to_string(),
                id: None,
                scale: None,
                endian: None,
                enum_ref: None,
                notes: None,
            })],
        );

        let mut cmd_aliases = HashMap::new();
        cmd_aliases.insert(7, 1);

        ProtocolConfig {
            meta: Meta {
                protocol: "test".to_string(),
                version: 1,
                default_endian: Endian::Little,
                notes: None,
            },
            types,
            enums: HashMap::new(),
            cmds,
            framing: Framing {
                head_len: 4,
                tail_len: 0,
                frame_head: "AA 55".to_string(),
            },
            head_fields: Vec::new(),
            cmd_aliases,
        }
    }

    #[test]
    fn test_layout_lookup() {
        let config = minimal_config();
        assert!(config.layout(1).is_ok());
        assert!(matches!(
            config.layout(2),
            Err(DecoderError::UnknownCommand(2))
        ));
    }

    #[test]
    fn test_cmd_alias_resolution() {
        let config = minimal_config();
        assert_eq!(config.resolve_cmd(7), 1);
        assert_eq!(config.resolve_cmd(1), 1);
        assert_eq!(config.resolve_cmd(99), 99);
    }

    #[test]
    fn test_unknown_type_and_enum() {
        let config = minimal_config();
        assert!(config.type_def("uint16").is_ok());
        assert!(matches!(
            config.type_def("nope"),
            Err(DecoderError::UnknownType(_))
        ));
        assert!(matches!(
            config.enum_def("nope"),
            Err(DecoderError::UnknownEnum(_))
        ));
    }

    #[test]
    fn test_stats() {
        let config = minimal_config();
        let stats = config.stats();
        assert_eq!(stats.num_types, 1);
        assert_eq!(stats.num_enums, 0);
        assert_eq!(stats.num_cmds, 1);
    }
}

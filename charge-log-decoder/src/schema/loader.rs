//! Schema loading and validation
//!
//! Parses a TOML schema document into a [`ProtocolConfig`], applying the
//! hard consistency checks a config must pass before it can be used for
//! decoding. Softer lint-style checks live in [`validate`], which reports
//! diagnostics without rejecting the config.

use log::{debug, info};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::schema::model::{
    BaseType, BitDef, BitOrder, BitfieldGroup, Endian, EnumDef, Field, FieldItem, Framing, Group,
    HeaderField, HeaderFieldKind, Meta, ProtocolConfig, StrEncoding, TypeDef,
};
use crate::types::{DecoderError, Result};

// ---------------------------------------------------------------------------
// Raw document shapes (serde targets)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDocument {
    meta: RawMeta,
    compatibility: RawCompatibility,
    #[serde(default)]
    types: HashMap<String, RawTypeDef>,
    /// enum name → { "<int>" = "label" }; TOML keys are strings, so the
    /// integer keys are parsed during conversion
    #[serde(default)]
    enums: HashMap<String, HashMap<String, String>>,
    /// "<cmd id>" → layout
    #[serde(default)]
    cmds: HashMap<String, RawCmd>,
    /// "<alias id>" → canonical id
    #[serde(default)]
    cmd_aliases: HashMap<String, u32>,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    protocol: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "default_endian")]
    default_endian: Endian,
    #[serde(default)]
    notes: Option<String>,
}

fn default_version() -> u32 {
    1
}

fn default_endian() -> Endian {
    Endian::Little
}

#[derive(Debug, Deserialize)]
struct RawCompatibility {
    head_len: usize,
    #[serde(default)]
    tail_len: usize,
    frame_head: String,
    #[serde(default)]
    head_fields: Vec<RawHeaderField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
enum RawHeaderKind {
    #[default]
    #[serde(rename = "uint")]
    Uint,
    #[serde(rename = "const")]
    Const,
    #[serde(rename = "hex")]
    Hex,
    #[serde(rename = "ascii")]
    Ascii,
}

#[derive(Debug, Deserialize)]
struct RawHeaderField {
    name: String,
    offset: usize,
    length: usize,
    #[serde(default)]
    endian: Option<Endian>,
    #[serde(default, rename = "type")]
    kind: RawHeaderKind,
    /// Required value for `const` fields
    #[serde(default)]
    const_value: Option<u64>,
    #[serde(default = "default_true")]
    required: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawTypeDef {
    base: BaseType,
    #[serde(default)]
    bytes: Option<usize>,
    #[serde(default)]
    signed: Option<bool>,
    #[serde(default)]
    encoding: Option<StrEncoding>,
    #[serde(default)]
    bits: Option<Vec<String>>,
    #[serde(default)]
    groups: Option<Vec<BitfieldGroup>>,
    #[serde(default)]
    order: Option<BitOrder>,
}

#[derive(Debug, Deserialize)]
struct RawCmd {
    fields: Vec<RawEntry>,
}

/// One layout entry: plain field or repeating group, told apart by the
/// presence of a nested `fields` list
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    repeat_const: Option<usize>,
    #[serde(default)]
    repeat_by: Option<String>,
    #[serde(default)]
    fields: Option<Vec<RawEntry>>,

    #[serde(default)]
    len: Option<usize>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    type_name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    endian: Option<Endian>,
    #[serde(default, rename = "enum")]
    enum_ref: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate a schema from TOML text
pub fn load_from_str(text: &str) -> Result<ProtocolConfig> {
    let raw: RawDocument = toml::from_str(text)
        .map_err(|e| DecoderError::Schema(format!("TOML parse error: {}", e)))?;
    let config = convert(raw)?;
    check_config(&config)?;

    let stats = config.stats();
    debug!(
        "Loaded schema '{}' v{}: {} types, {} enums, {} commands",
        config.meta.protocol, config.meta.version, stats.num_types, stats.num_enums, stats.num_cmds
    );
    Ok(config)
}

/// Load and validate a schema from a file on disk
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ProtocolConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = load_from_str(&text)?;
    info!(
        "Loaded protocol schema '{}' from {}",
        config.meta.protocol,
        path.display()
    );
    Ok(config)
}

fn convert(raw: RawDocument) -> Result<ProtocolConfig> {
    let mut types = HashMap::new();
    for (name, t) in raw.types {
        types.insert(
            name,
            TypeDef {
                base: t.base,
                bytes: t.bytes,
                signed: t.signed,
                encoding: t.encoding,
                bits: t
                    .bits
                    .map(|names| names.into_iter().map(|name| BitDef { name }).collect()),
                groups: t.groups,
                order: t.order.unwrap_or_default(),
            },
        );
    }

    let mut enums = HashMap::new();
    for (name, table) in raw.enums {
        let mut values = HashMap::new();
        for (key, label) in table {
            let value = parse_int_key(&key).ok_or_else(|| {
                DecoderError::Schema(format!("enum '{}': bad integer key '{}'", name, key))
            })?;
            values.insert(value, label);
        }
        enums.insert(name, EnumDef { values });
    }

    let mut cmds = HashMap::new();
    for (key, cmd) in raw.cmds {
        let cmd_id = parse_int_key(&key)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| DecoderError::Schema(format!("bad command id key '{}'", key)))?;
        let items = cmd
            .fields
            .into_iter()
            .map(|entry| convert_entry(cmd_id, entry))
            .collect::<Result<Vec<_>>>()?;
        cmds.insert(cmd_id, items);
    }

    let mut cmd_aliases = HashMap::new();
    for (key, target) in raw.cmd_aliases {
        let alias = parse_int_key(&key)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| DecoderError::Schema(format!("bad alias id key '{}'", key)))?;
        cmd_aliases.insert(alias, target);
    }

    let head_fields = raw
        .compatibility
        .head_fields
        .into_iter()
        .map(|h| convert_header_field(h, raw.meta.default_endian))
        .collect::<Result<Vec<_>>>()?;

    Ok(ProtocolConfig {
        meta: Meta {
            protocol: raw.meta.protocol,
            version: raw.meta.version,
            default_endian: raw.meta.default_endian,
            notes: raw.meta.notes,
        },
        types,
        enums,
        cmds,
        framing: Framing {
            head_len: raw.compatibility.head_len,
            tail_len: raw.compatibility.tail_len,
            frame_head: raw.compatibility.frame_head,
        },
        head_fields,
        cmd_aliases,
    })
}

fn convert_entry(cmd_id: u32, entry: RawEntry) -> Result<FieldItem> {
    if let Some(children) = entry.fields {
        match (entry.repeat_const, &entry.repeat_by) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(DecoderError::Schema(format!(
                    "cmd {}: group must set exactly one of repeat_const / repeat_by",
                    cmd_id
                )));
            }
            _ => {}
        }
        let fields = children
            .into_iter()
            .map(|child| convert_entry(cmd_id, child))
            .collect::<Result<Vec<_>>>()?;
        if fields.is_empty() {
            return Err(DecoderError::Schema(format!(
                "cmd {}: group has an empty field list",
                cmd_id
            )));
        }
        return Ok(FieldItem::Group(Group {
            repeat_const: entry.repeat_const,
            repeat_by: entry.repeat_by,
            fields,
        }));
    }

    let name = entry
        .name
        .ok_or_else(|| DecoderError::Schema(format!("cmd {}: field without a name", cmd_id)))?;
    let len = entry.len.ok_or_else(|| {
        DecoderError::Schema(format!("cmd {}: field '{}' without len", cmd_id, name))
    })?;
    let type_name = entry.type_name.ok_or_else(|| {
        DecoderError::Schema(format!("cmd {}: field '{}' without type", cmd_id, name))
    })?;
    if len == 0 {
        return Err(DecoderError::Schema(format!(
            "cmd {}: field '{}' has len 0",
            cmd_id, name
        )));
    }

    Ok(FieldItem::Field(Field {
        len,
        name,
        type_name,
        id: entry.id,
        scale: entry.scale,
        endian: entry.endian,
        enum_ref: entry.enum_ref,
        notes: entry.notes,
    }))
}

fn convert_header_field(raw: RawHeaderField, default_endian: Endian) -> Result<HeaderField> {
    let kind = match raw.kind {
        RawHeaderKind::Uint => HeaderFieldKind::Uint,
        RawHeaderKind::Const => {
            let expected = raw.const_value.ok_or_else(|| {
                DecoderError::Schema(format!(
                    "header field '{}': const without a const_value",
                    raw.name
                ))
            })?;
            HeaderFieldKind::Const { expected }
        }
        RawHeaderKind::Hex => HeaderFieldKind::Hex,
        RawHeaderKind::Ascii => HeaderFieldKind::Ascii,
    };
    if raw.length == 0 {
        return Err(DecoderError::Schema(format!(
            "header field '{}' has length 0",
            raw.name
        )));
    }
    if matches!(kind, HeaderFieldKind::Uint | HeaderFieldKind::Const { .. }) && raw.length > 8 {
        return Err(DecoderError::Schema(format!(
            "header field '{}': integer length {} exceeds 8 bytes",
            raw.name, raw.length
        )));
    }

    Ok(HeaderField {
        name: raw.name,
        offset: raw.offset,
        length: raw.length,
        endian: raw.endian.unwrap_or(default_endian),
        kind,
        required: raw.required,
    })
}

/// Parse a decimal or `0x`-prefixed hex integer key
fn parse_int_key(key: &str) -> Option<i64> {
    let key = key.trim();
    if let Some(hex) = key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        key.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Hard consistency checks
// ---------------------------------------------------------------------------

fn check_config(config: &ProtocolConfig) -> Result<()> {
    for (name, t) in &config.types {
        check_type(name, t, config)?;
    }
    for (cmd_id, items) in &config.cmds {
        check_items(*cmd_id, items, config)?;
    }
    if config.framing.frame_head.trim().is_empty() {
        return Err(DecoderError::Schema(
            "framing.frame_head must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_type(name: &str, t: &TypeDef, config: &ProtocolConfig) -> Result<()> {
    match t.base {
        BaseType::Bitset => {
            if t.bits.as_ref().map_or(true, Vec::is_empty) {
                return Err(DecoderError::Schema(format!(
                    "bitset type '{}' declares no bits",
                    name
                )));
            }
        }
        BaseType::Bitfield => {
            let bytes = t.bytes.ok_or_else(|| {
                DecoderError::Schema(format!("bitfield type '{}' has no bytes", name))
            })?;
            let groups = t.groups.as_ref().filter(|g| !g.is_empty()).ok_or_else(|| {
                DecoderError::Schema(format!("bitfield type '{}' declares no groups", name))
            })?;
            let total_bits = bytes as u32 * 8;
            let mut used = vec![false; total_bits as usize];
            for group in groups {
                if group.width == 0 || group.start_bit + group.width > total_bits {
                    return Err(DecoderError::Schema(format!(
                        "bitfield type '{}': group '{}' ({}+{}) exceeds {} bits",
                        name, group.name, group.start_bit, group.width, total_bits
                    )));
                }
                for bit in group.start_bit..group.start_bit + group.width {
                    if used[bit as usize] {
                        return Err(DecoderError::Schema(format!(
                            "bitfield type '{}': group '{}' overlaps an earlier group",
                            name, group.name
                        )));
                    }
                    used[bit as usize] = true;
                }
                if let Some(enum_ref) = &group.enum_ref {
                    if !config.enums.contains_key(enum_ref) {
                        return Err(DecoderError::Schema(format!(
                            "bitfield type '{}': group '{}' references unknown enum '{}'",
                            name, group.name, enum_ref
                        )));
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_items(cmd_id: u32, items: &[FieldItem], config: &ProtocolConfig) -> Result<()> {
    for item in items {
        match item {
            FieldItem::Field(field) => {
                if !config.types.contains_key(&field.type_name) {
                    return Err(DecoderError::Schema(format!(
                        "cmd {}: field '{}' references unknown type '{}'",
                        cmd_id, field.name, field.type_name
                    )));
                }
                if let Some(enum_ref) = &field.enum_ref {
                    if !config.enums.contains_key(enum_ref) {
                        return Err(DecoderError::Schema(format!(
                            "cmd {}: field '{}' references unknown enum '{}'",
                            cmd_id, field.name, enum_ref
                        )));
                    }
                }
            }
            FieldItem::Group(group) => check_items(cmd_id, &group.fields, config)?,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lint-style validation
// ---------------------------------------------------------------------------

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Run lint-style checks over an already-loaded config
///
/// Unlike the hard checks applied at load time, these findings do not
/// reject the config; an unresolved `repeat_by` only surfaces at decode
/// time for the frames that reach it.
pub fn validate(config: &ProtocolConfig) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    for (cmd_id, items) in &config.cmds {
        let mut seen_ids = HashSet::new();
        validate_repeat_refs(*cmd_id, items, &mut seen_ids, &mut diags);
    }

    let mut used_enums: HashSet<&str> = HashSet::new();
    for items in config.cmds.values() {
        collect_enum_refs(items, &mut used_enums);
    }
    for t in config.types.values() {
        if let Some(groups) = &t.groups {
            for group in groups {
                if let Some(enum_ref) = &group.enum_ref {
                    used_enums.insert(enum_ref);
                }
            }
        }
    }
    for name in config.enums.keys() {
        if !used_enums.contains(name.as_str()) {
            diags.push(Diagnostic {
                severity: Severity::Warning,
                message: format!("enum '{}' is never referenced", name),
            });
        }
    }

    for (alias, target) in &config.cmd_aliases {
        if !config.cmds.contains_key(target) {
            diags.push(Diagnostic {
                severity: Severity::Warning,
                message: format!("cmd alias {} points at undeclared cmd {}", alias, target),
            });
        }
    }

    diags
}

fn validate_repeat_refs(
    cmd_id: u32,
    items: &[FieldItem],
    seen_ids: &mut HashSet<String>,
    diags: &mut Vec<Diagnostic>,
) {
    for item in items {
        match item {
            FieldItem::Field(field) => {
                if let Some(id) = &field.id {
                    seen_ids.insert(id.clone());
                }
            }
            FieldItem::Group(group) => {
                if let Some(repeat_by) = &group.repeat_by {
                    if !seen_ids.contains(repeat_by) {
                        diags.push(Diagnostic {
                            severity: Severity::Error,
                            message: format!(
                                "cmd {}: repeat_by '{}' has no earlier field id in scope",
                                cmd_id, repeat_by
                            ),
                        });
                    }
                }
                validate_repeat_refs(cmd_id, &group.fields, seen_ids, diags);
            }
        }
    }
}

fn collect_enum_refs<'a>(items: &'a [FieldItem], out: &mut HashSet<&'a str>) {
    for item in items {
        match item {
            FieldItem::Field(field) => {
                if let Some(enum_ref) = &field.enum_ref {
                    out.insert(enum_ref);
                }
            }
            FieldItem::Group(group) => collect_enum_refs(&group.fields, out),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Caches loaded configs by path so repeated parses of the same log
/// directory reuse one schema instance.
#[derive(Debug, Default)]
pub struct SchemaCache {
    configs: HashMap<PathBuf, Arc<ProtocolConfig>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a schema file, returning the cached instance when present
    pub fn get_or_load<P: AsRef<Path>>(&mut self, path: P) -> Result<Arc<ProtocolConfig>> {
        let key = path
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        if let Some(config) = self.configs.get(&key) {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(load_from_file(&key)?);
        self.configs.insert(key, Arc::clone(&config));
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn clear(&mut self) {
        self.configs.clear();
    }
}

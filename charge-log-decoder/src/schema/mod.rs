//! Protocol schema: declarative model plus the TOML loader
//!
//! A schema document declares named types, enums, framing geometry,
//! header fields and per-command payload layouts. The loader turns one
//! document into an immutable [`ProtocolConfig`] that the codec and the
//! record parser consume.

pub mod loader;
pub mod model;

pub use loader::{load_from_file, load_from_str, validate, Diagnostic, SchemaCache, Severity};
pub use model::{
    BaseType, BitDef, BitOrder, BitfieldGroup, Endian, EnumDef, Field, FieldItem, Framing, Group,
    HeaderField, HeaderFieldKind, Meta, ProtocolConfig, SchemaStats, StrEncoding, TypeDef,
};

//! Schema-driven field codec
//!
//! Walks a command layout left to right over a payload buffer, decoding
//! each field according to its declared type and accumulating the results
//! into an ordered name→value map. Short buffers degrade to the
//! missing-data sentinel instead of failing the record; repeat counts for
//! dynamic groups come from an explicit per-frame context table.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{Local, NaiveDate, TimeZone};
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::model::{BaseType, BitOrder, Endian, Field, FieldItem, Group, TypeDef};
use crate::schema::ProtocolConfig;
use crate::types::{hex_upper, DecoderError, Result, Value, ValueMap};

/// Per-frame symbol table: field id → raw integer value
///
/// Scoped to one decode call and passed down the recursion explicitly;
/// group iterations work on clones so ids set inside one iteration never
/// leak into siblings or the parent scope.
pub type Context = HashMap<String, u64>;

/// Repeat counts above this are treated as corrupt input
const MAX_REPEAT: usize = 10_000;

/// Schema-driven decoder for command payloads
///
/// Pure given `(buffer, layout, context)`: no internal mutable state, so
/// one codec can be shared across frames and threads.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    config: Arc<ProtocolConfig>,
}

impl FieldCodec {
    pub fn new(config: Arc<ProtocolConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Decode a payload against a command layout with a fresh context
    pub fn decode(&self, buffer: &[u8], items: &[FieldItem]) -> Result<ValueMap> {
        let mut context = Context::new();
        self.decode_fields(buffer, items, &mut context)
            .map(|(map, _)| map)
    }

    /// Decode a layout starting at the buffer's first byte
    ///
    /// Returns the decoded map and the number of bytes consumed, which
    /// callers use to size repeated group iterations.
    pub fn decode_fields(
        &self,
        buffer: &[u8],
        items: &[FieldItem],
        context: &mut Context,
    ) -> Result<(ValueMap, usize)> {
        let mut out = ValueMap::new();
        let mut cursor = 0usize;

        for item in items {
            match item {
                FieldItem::Field(field) => {
                    let avail = buffer.len() - cursor;
                    if avail < field.len {
                        // Short field: sentinel, consume what's there and
                        // keep decoding the remaining fields.
                        warn!(
                            "field '{}' needs {} bytes, only {} left",
                            field.name, field.len, avail
                        );
                        out.insert(field.name.clone(), Value::Missing);
                        cursor = buffer.len();
                        continue;
                    }

                    let bytes = &buffer[cursor..cursor + field.len];
                    let raw = self.decode_field(bytes, field)?;
                    if let (Some(id), Some(n)) = (&field.id, raw.as_u64()) {
                        context.insert(id.clone(), n);
                    }
                    let value = self.post_process(raw, field)?;
                    out.insert(field.name.clone(), value);
                    cursor += field.len;
                }
                FieldItem::Group(group) => {
                    let (map, consumed) = self.decode_group(&buffer[cursor..], group, context)?;
                    out.extend(map);
                    cursor += consumed;
                }
            }
        }

        Ok((out, cursor))
    }

    fn decode_group(
        &self,
        buffer: &[u8],
        group: &Group,
        context: &Context,
    ) -> Result<(ValueMap, usize)> {
        let count = if let Some(repeat_by) = &group.repeat_by {
            *context
                .get(repeat_by)
                .ok_or_else(|| DecoderError::MissingContextField(repeat_by.clone()))?
                as usize
        } else {
            group.repeat_const.unwrap_or(0)
        };
        if count > MAX_REPEAT {
            return Err(DecoderError::Schema(format!(
                "repeat count {} exceeds supported maximum {}",
                count, MAX_REPEAT
            )));
        }

        let mut iterations = Vec::with_capacity(count);
        let mut cursor = 0usize;
        for _ in 0..count {
            let mut iter_context = context.clone();
            let (map, consumed) =
                self.decode_fields(&buffer[cursor..], &group.fields, &mut iter_context)?;
            iterations.push(map);
            cursor += consumed;
        }

        let mut out = ValueMap::new();
        match count {
            // Count 0 emits nothing at all
            0 => {}
            1 => {
                if let Some(map) = iterations.pop() {
                    out.extend(map);
                }
            }
            _ => {
                let key = format!("{}_list", first_field_name(&group.fields));
                out.insert(key, Value::List(iterations));
            }
        }
        Ok((out, cursor))
    }

    /// Decode exactly `field.len` bytes according to the field's type
    fn decode_field(&self, bytes: &[u8], field: &Field) -> Result<Value> {
        let type_def = self.config.type_def(&field.type_name)?;
        let endian = field.endian.unwrap_or(self.config.meta.default_endian);

        match type_def.base {
            BaseType::Uint => read_uint_checked(bytes, endian).map(Value::UInt),
            BaseType::Int => read_int_checked(bytes, endian).map(Value::Int),
            BaseType::Str => Ok(Value::Str(decode_str(
                bytes,
                type_def.encoding.unwrap_or_default(),
                &field.name,
            ))),
            BaseType::Hex => Ok(Value::Str(hex_upper(bytes))),
            BaseType::Bcd => decode_bcd(bytes).map(Value::Str),
            BaseType::TimeCp56Time2a => Ok(Value::Str(decode_cp56time2a(bytes))),
            BaseType::TimeBcd7 | BaseType::TimeBcd8 => decode_bcd_time(bytes).map(Value::Str),
            BaseType::TimeBin7 => decode_bin7(bytes, endian).map(Value::Str),
            BaseType::TimeUnix => decode_unix(bytes, endian, false).map(Value::Str),
            BaseType::TimeUnixMs => decode_unix(bytes, endian, true).map(Value::Str),
            BaseType::Bitset => Ok(self.decode_bitset(bytes, type_def, endian)),
            BaseType::Bitfield => self.decode_bitfield(bytes, type_def, endian),
        }
    }

    fn decode_bitset(&self, bytes: &[u8], type_def: &TypeDef, endian: Endian) -> Value {
        let bits = match &type_def.bits {
            Some(bits) if !bits.is_empty() => bits,
            _ => return Value::Str(hex_upper(bytes)),
        };
        if bytes.is_empty() || bytes.len() > 8 {
            return Value::Str(hex_upper(bytes));
        }

        let value = read_uint_raw(bytes, endian);
        let total_bits = bytes.len() * 8;
        let mut map = ValueMap::new();
        for (i, bit) in bits.iter().enumerate() {
            if i < total_bits {
                map.insert(bit.name.clone(), Value::Bool((value >> i) & 1 == 1));
            }
        }
        Value::Map(map)
    }

    fn decode_bitfield(&self, bytes: &[u8], type_def: &TypeDef, endian: Endian) -> Result<Value> {
        let groups = match &type_def.groups {
            Some(groups) if !groups.is_empty() => groups,
            _ => return Ok(Value::Str(hex_upper(bytes))),
        };
        if bytes.is_empty() || bytes.len() > 8 {
            return Err(DecoderError::UnsupportedWidth(bytes.len()));
        }

        let value = read_uint_raw(bytes, endian);
        let total_bits = bytes.len() as u32 * 8;
        let mut map = ValueMap::new();

        for group in groups {
            if group.start_bit + group.width > total_bits {
                warn!(
                    "bitfield group '{}' ({}+{}) outside {}-bit container, skipped",
                    group.name, group.start_bit, group.width, total_bits
                );
                continue;
            }
            let start = match type_def.order {
                BitOrder::Lsb0 => group.start_bit,
                BitOrder::Msb0 => total_bits - group.start_bit - group.width,
            };
            let mask = if group.width >= 64 {
                u64::MAX
            } else {
                (1u64 << group.width) - 1
            };
            let slice = (value >> start) & mask;

            let rendered = if let Some(enum_ref) = &group.enum_ref {
                let enum_def = self.config.enum_def(enum_ref)?;
                match enum_def.label(slice as i64) {
                    Some(label) => Value::Str(label.to_string()),
                    None => Value::Str(format!("Unknown({})", slice)),
                }
            } else {
                Value::UInt(slice)
            };
            map.insert(group.name.clone(), rendered);
        }

        Ok(Value::Map(map))
    }

    /// Scale then enum mapping; the enum is matched against the raw
    /// integer and replaces the scaled value when it hits.
    fn post_process(&self, raw: Value, field: &Field) -> Result<Value> {
        let raw_int = raw.as_i64();
        let mut value = raw;

        if let Some(scale) = field.scale {
            let numeric = match &value {
                Value::UInt(v) => Some(*v as f64),
                Value::Int(v) => Some(*v as f64),
                _ => None,
            };
            if let Some(numeric) = numeric {
                value = Value::Float(round_scaled(numeric * scale));
            }
        }

        if let Some(enum_ref) = &field.enum_ref {
            let enum_def = self.config.enum_def(enum_ref)?;
            if let Some(raw_int) = raw_int {
                if let Some(label) = enum_def.label(raw_int) {
                    value = Value::Enum {
                        value: raw_int,
                        name: label.to_string(),
                    };
                }
            }
        }

        Ok(value)
    }
}

fn first_field_name(items: &[FieldItem]) -> &str {
    match items.first() {
        Some(FieldItem::Field(field)) => &field.name,
        Some(FieldItem::Group(group)) => first_field_name(&group.fields),
        None => "unknown",
    }
}

// ---------------------------------------------------------------------------
// Primitive decoders
// ---------------------------------------------------------------------------

/// Read an unsigned integer of any width 1..=8, no width policy applied
pub(crate) fn read_uint_raw(bytes: &[u8], endian: Endian) -> u64 {
    match endian {
        Endian::Little => LittleEndian::read_uint(bytes, bytes.len()),
        Endian::Big => BigEndian::read_uint(bytes, bytes.len()),
    }
}

fn read_uint_checked(bytes: &[u8], endian: Endian) -> Result<u64> {
    match bytes.len() {
        1 | 2 | 4 | 8 => Ok(read_uint_raw(bytes, endian)),
        n => Err(DecoderError::UnsupportedWidth(n)),
    }
}

fn read_int_checked(bytes: &[u8], endian: Endian) -> Result<i64> {
    match bytes.len() {
        1 | 2 | 4 | 8 => Ok(match endian {
            Endian::Little => LittleEndian::read_int(bytes, bytes.len()),
            Endian::Big => BigEndian::read_int(bytes, bytes.len()),
        }),
        n => Err(DecoderError::UnsupportedWidth(n)),
    }
}

/// Decode a string field, stripping trailing NULs; undecodable bytes fall
/// back to uppercase hex of the whole field.
fn decode_str(bytes: &[u8], encoding: crate::schema::StrEncoding, field_name: &str) -> String {
    use crate::schema::StrEncoding;

    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    let trimmed = &bytes[..end];

    let decoded = match encoding {
        StrEncoding::Ascii if trimmed.is_ascii() => {
            Some(String::from_utf8_lossy(trimmed).into_owned())
        }
        StrEncoding::Ascii => None,
        StrEncoding::Utf8 => std::str::from_utf8(trimmed).ok().map(str::to_owned),
    };
    match decoded {
        Some(s) => s,
        None => {
            warn!("field '{}': undecodable string bytes, using hex", field_name);
            hex_upper(bytes)
        }
    }
}

fn decode_bcd(bytes: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        let high = byte >> 4;
        let low = byte & 0x0F;
        if high > 9 || low > 9 {
            return Err(DecoderError::InvalidBcd(byte));
        }
        out.push((b'0' + high) as char);
        out.push((b'0' + low) as char);
    }
    Ok(out)
}

/// CP56Time2a: ms(2,LE) + minute(6b) + hour(5b) + day(5b) + month(4b) +
/// year(7b, offset 2000). Malformed input renders as hex, never an error.
fn decode_cp56time2a(bytes: &[u8]) -> String {
    if bytes.len() != 7 {
        warn!("CP56Time2a needs 7 bytes, got {}, using hex", bytes.len());
        return hex_upper(bytes);
    }

    let ms = u16::from_le_bytes([bytes[0], bytes[1]]);
    let minute = (bytes[2] & 0x3F) as u32;
    let hour = (bytes[3] & 0x1F) as u32;
    let day = (bytes[4] & 0x1F) as u32;
    let month = (bytes[5] & 0x0F) as u32;
    let year = 2000 + (bytes[6] & 0x7F) as i32;
    let second = (ms / 1000) as u32;
    let milli = (ms % 1000) as u32;

    match NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_milli_opt(hour, minute, second, milli))
    {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        None => {
            warn!("CP56Time2a out of range, using hex");
            hex_upper(bytes)
        }
    }
}

/// BCD timestamp: YYYY(2) MM DD HH MM SS, 7 or 8 bytes (8th ignored)
fn decode_bcd_time(bytes: &[u8]) -> Result<String> {
    if bytes.len() != 7 && bytes.len() != 8 {
        return Err(DecoderError::InvalidTimeData(format!(
            "BCD time needs 7 or 8 bytes, got {}",
            bytes.len()
        )));
    }
    let digits = decode_bcd(&bytes[..7])
        .map_err(|e| DecoderError::InvalidTimeData(format!("non-BCD time byte ({})", e)))?;

    Ok(format!(
        "{}-{}-{} {}:{}:{}",
        &digits[0..4],
        &digits[4..6],
        &digits[6..8],
        &digits[8..10],
        &digits[10..12],
        &digits[12..14]
    ))
}

/// Binary timestamp: year(2, declared endian) month day hour minute second
fn decode_bin7(bytes: &[u8], endian: Endian) -> Result<String> {
    if bytes.len() != 7 {
        return Err(DecoderError::InvalidTimeData(format!(
            "binary time needs 7 bytes, got {}",
            bytes.len()
        )));
    }
    let year = read_uint_raw(&bytes[0..2], endian);
    Ok(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, bytes[2], bytes[3], bytes[4], bytes[5], bytes[6]
    ))
}

/// Unix timestamp: 4-byte seconds or 8-byte milliseconds, local time
fn decode_unix(bytes: &[u8], endian: Endian, millis: bool) -> Result<String> {
    let expected = if millis { 8 } else { 4 };
    if bytes.len() != expected {
        return Err(DecoderError::InvalidTimeData(format!(
            "unix time needs {} bytes, got {}",
            expected,
            bytes.len()
        )));
    }

    let raw = read_uint_raw(bytes, endian);
    let (secs, milli) = if millis {
        ((raw / 1000) as i64, (raw % 1000) as u32)
    } else {
        (raw as i64, 0)
    };

    match Local.timestamp_opt(secs, milli * 1_000_000).single() {
        Some(dt) => {
            let fmt = if millis {
                "%Y-%m-%d %H:%M:%S%.3f"
            } else {
                "%Y-%m-%d %H:%M:%S"
            };
            Ok(dt.format(fmt).to_string())
        }
        None => Err(DecoderError::InvalidTimeData(format!(
            "timestamp {} out of range",
            raw
        ))),
    }
}

/// Round a scaled product to the fewest decimal places that reproduce it
/// within a tight epsilon, so `2200 * 0.01` reads back as `22.0` rather
/// than a binary-float artifact.
fn round_scaled(product: f64) -> f64 {
    for places in 0..=10 {
        let factor = 10f64.powi(places);
        let rounded = (product * factor).round() / factor;
        if (rounded - product).abs() <= product.abs().max(1.0) * 1e-9 {
            return rounded;
        }
    }
    product
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader::load_from_str;

    fn codec(schema: &str) -> FieldCodec {
        FieldCodec::new(Arc::new(load_from_str(schema).unwrap()))
    }

    const NUMERIC_SCHEMA: &str = r#"
[meta]
protocol = "t"
default_endian = "LE"

[compatibility]
head_len = 1
frame_head = "AA"

[types.u]
base = "uint"

[types.i]
base = "int"

[enums.mode]
0 = "Idle"
1 = "Charging"

[cmds.1]
fields = [
    { len = 2, name = "a", type = "u" },
    { len = 2, name = "b", type = "u", endian = "BE" },
    { len = 2, name = "c", type = "i" },
]

[cmds.2]
fields = [
    { len = 2, name = "voltage", type = "u", scale = 0.01 },
    { len = 1, name = "mode", type = "u", enum = "mode" },
    { len = 1, name = "state", type = "u", enum = "mode" },
]
"#;

    #[test]
    fn test_uint_both_endians() {
        let codec = codec(NUMERIC_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let map = codec
            .decode(&[0x2C, 0x01, 0x01, 0x2C, 0xFF, 0xFF], &layout)
            .unwrap();
        assert_eq!(map.get("a"), Some(&Value::UInt(300)));
        assert_eq!(map.get("b"), Some(&Value::UInt(300)));
        assert_eq!(map.get("c"), Some(&Value::Int(-1)));
    }

    #[test]
    fn test_integer_boundary_values() {
        let schema = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.u]
base = "uint"

[types.i]
base = "int"

[cmds.1]
fields = [
    { len = 8, name = "umax", type = "u" },
    { len = 8, name = "imin", type = "i" },
    { len = 4, name = "imax", type = "i", endian = "BE" },
    { len = 1, name = "zero", type = "u" },
]
"#;
        let codec = codec(schema);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let mut data = Vec::new();
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&i64::MIN.to_le_bytes());
        data.extend_from_slice(&i32::MAX.to_be_bytes());
        data.push(0);

        let map = codec.decode(&data, &layout).unwrap();
        assert_eq!(map.get("umax"), Some(&Value::UInt(u64::MAX)));
        assert_eq!(map.get("imin"), Some(&Value::Int(i64::MIN)));
        assert_eq!(map.get("imax"), Some(&Value::Int(i32::MAX as i64)));
        assert_eq!(map.get("zero"), Some(&Value::UInt(0)));
    }

    #[test]
    fn test_unsupported_width() {
        let schema = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.u]
base = "uint"

[cmds.1]
fields = [ { len = 3, name = "odd", type = "u" } ]
"#;
        let codec = codec(schema);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let err = codec.decode(&[1, 2, 3], &layout).unwrap_err();
        assert!(matches!(err, DecoderError::UnsupportedWidth(3)));
    }

    #[test]
    fn test_short_field_becomes_missing() {
        let codec = codec(NUMERIC_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        // Enough for "a", one byte short for "b", nothing for "c"
        let map = codec.decode(&[0x2C, 0x01, 0x42], &layout).unwrap();
        assert_eq!(map.get("a"), Some(&Value::UInt(300)));
        assert_eq!(map.get("b"), Some(&Value::Missing));
        assert_eq!(map.get("c"), Some(&Value::Missing));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_scale_has_no_float_artifact() {
        let codec = codec(NUMERIC_SCHEMA);
        let layout = codec.config().layout(2).unwrap().to_vec();
        // 2200 * 0.01 must come out exactly 22.0
        let map = codec.decode(&[0x98, 0x08, 0x01, 0x05], &layout).unwrap();
        assert_eq!(map.get("voltage"), Some(&Value::Float(22.0)));
    }

    #[test]
    fn test_enum_match_and_passthrough() {
        let codec = codec(NUMERIC_SCHEMA);
        let layout = codec.config().layout(2).unwrap().to_vec();
        let map = codec.decode(&[0x00, 0x00, 0x01, 0x05], &layout).unwrap();
        assert_eq!(
            map.get("mode"),
            Some(&Value::Enum {
                value: 1,
                name: "Charging".to_string()
            })
        );
        // 5 has no enum entry: raw value untouched
        assert_eq!(map.get("state"), Some(&Value::UInt(5)));
    }

    #[test]
    fn test_str_hex_bcd() {
        let schema = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.ascii8]
base = "str"

[types.raw]
base = "hex"

[types.serial]
base = "bcd"

[cmds.1]
fields = [
    { len = 4, name = "tag", type = "ascii8" },
    { len = 2, name = "blob", type = "raw" },
    { len = 3, name = "serial", type = "serial" },
]
"#;
        let codec = codec(schema);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let map = codec
            .decode(&[b'G', b'U', b'N', 0x00, 0xAB, 0x01, 0x12, 0x34, 0x56], &layout)
            .unwrap();
        assert_eq!(map.get("tag"), Some(&Value::Str("GUN".to_string())));
        assert_eq!(map.get("blob"), Some(&Value::Str("AB01".to_string())));
        assert_eq!(map.get("serial"), Some(&Value::Str("123456".to_string())));
    }

    #[test]
    fn test_bcd_rejects_hex_nibble() {
        let schema = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.serial]
base = "bcd"

[cmds.1]
fields = [ { len = 1, name = "serial", type = "serial" } ]
"#;
        let codec = codec(schema);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let err = codec.decode(&[0x1A], &layout).unwrap_err();
        assert!(matches!(err, DecoderError::InvalidBcd(0x1A)));
    }

    #[test]
    fn test_cp56time2a_valid_and_fallback() {
        // 2024-05-23 13:32:09.500
        let bytes = [0x1C, 0x25, 32, 13, 23, 5, 24];
        assert_eq!(decode_cp56time2a(&bytes), "2024-05-23T13:32:09.500");

        // Month 0 is invalid: hex fallback, no error
        let bad = [0x00, 0x00, 0, 0, 1, 0, 24];
        assert_eq!(decode_cp56time2a(&bad), "00000000010018");
    }

    #[test]
    fn test_bcd_time_and_bin_time() {
        let bcd = [0x20, 0x24, 0x05, 0x23, 0x13, 0x32, 0x09];
        assert_eq!(decode_bcd_time(&bcd).unwrap(), "2024-05-23 13:32:09");

        // 8th byte is ignored
        let bcd8 = [0x20, 0x24, 0x05, 0x23, 0x13, 0x32, 0x09, 0xFF];
        assert_eq!(decode_bcd_time(&bcd8).unwrap(), "2024-05-23 13:32:09");

        assert!(matches!(
            decode_bcd_time(&[0x20, 0x24]),
            Err(DecoderError::InvalidTimeData(_))
        ));

        let bin = [0xE8, 0x07, 5, 23, 13, 32, 9];
        assert_eq!(
            decode_bin7(&bin, Endian::Little).unwrap(),
            "2024-05-23 13:32:09"
        );
    }

    #[test]
    fn test_unix_time_length_check() {
        assert!(matches!(
            decode_unix(&[0, 0], Endian::Little, false),
            Err(DecoderError::InvalidTimeData(_))
        ));
        assert!(decode_unix(&[0x00, 0x28, 0x6F, 0x66], Endian::Little, false).is_ok());
    }

    const BITS_SCHEMA: &str = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.alarms]
base = "bitset"
bits = ["overvoltage", "undervoltage", "overtemp"]

[types.status]
base = "bitfield"
bytes = 1
groups = [
    { name = "mode", start_bit = 0, width = 2, enum = "work_mode" },
    { name = "fault", start_bit = 2, width = 1 },
    { name = "level", start_bit = 3, width = 5 },
]

[types.status_msb]
base = "bitfield"
bytes = 1
order = "msb0"
groups = [
    { name = "top", start_bit = 0, width = 2 },
]

[enums.work_mode]
0 = "Idle"
1 = "Charging"

[cmds.1]
fields = [ { len = 1, name = "alarms", type = "alarms" } ]

[cmds.2]
fields = [ { len = 1, name = "status", type = "status" } ]

[cmds.3]
fields = [ { len = 1, name = "status", type = "status_msb" } ]
"#;

    #[test]
    fn test_bitset_named_booleans() {
        let codec = codec(BITS_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let map = codec.decode(&[0b0000_0101], &layout).unwrap();
        match map.get("alarms") {
            Some(Value::Map(bits)) => {
                assert_eq!(bits.get("overvoltage"), Some(&Value::Bool(true)));
                assert_eq!(bits.get("undervoltage"), Some(&Value::Bool(false)));
                assert_eq!(bits.get("overtemp"), Some(&Value::Bool(true)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bitfield_slices_and_enum() {
        let codec = codec(BITS_SCHEMA);
        let layout = codec.config().layout(2).unwrap().to_vec();
        // mode=1 (Charging), fault=1, level=0b10110 = 22
        let map = codec.decode(&[0b1011_0101], &layout).unwrap();
        match map.get("status") {
            Some(Value::Map(fields)) => {
                assert_eq!(fields.get("mode"), Some(&Value::Str("Charging".to_string())));
                assert_eq!(fields.get("fault"), Some(&Value::UInt(1)));
                assert_eq!(fields.get("level"), Some(&Value::UInt(22)));
            }
            other => panic!("unexpected: {:?}", other),
        }

        // mode=2 has no enum entry
        let map = codec.decode(&[0b0000_0010], &layout).unwrap();
        match map.get("status") {
            Some(Value::Map(fields)) => {
                assert_eq!(
                    fields.get("mode"),
                    Some(&Value::Str("Unknown(2)".to_string()))
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bitfield_single_subfield_max() {
        let codec = codec(BITS_SCHEMA);
        let layout = codec.config().layout(2).unwrap().to_vec();
        // Only level (5 bits, max 31) set
        let map = codec.decode(&[0b1111_1000], &layout).unwrap();
        match map.get("status") {
            Some(Value::Map(fields)) => {
                assert_eq!(fields.get("mode"), Some(&Value::Str("Idle".to_string())));
                assert_eq!(fields.get("fault"), Some(&Value::UInt(0)));
                assert_eq!(fields.get("level"), Some(&Value::UInt(31)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bitfield_msb0_numbering() {
        let codec = codec(BITS_SCHEMA);
        let layout = codec.config().layout(3).unwrap().to_vec();
        // msb0 start 0 width 2 reads the two highest bits
        let map = codec.decode(&[0b1100_0000], &layout).unwrap();
        match map.get("status") {
            Some(Value::Map(fields)) => {
                assert_eq!(fields.get("top"), Some(&Value::UInt(3)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    const GROUP_SCHEMA: &str = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.u]
base = "uint"

[cmds.1]
fields = [
    { len = 1, name = "gun_count", type = "u", id = "n" },
    { repeat_by = "n", fields = [
        { len = 1, name = "gun_no", type = "u" },
        { len = 2, name = "voltage", type = "u" },
    ] },
]

[cmds.2]
fields = [
    { repeat_const = 2, fields = [
        { len = 1, name = "slot", type = "u" },
    ] },
]

[cmds.3]
fields = [
    { repeat_by = "n", fields = [
        { len = 1, name = "x", type = "u" },
    ] },
]
"#;

    #[test]
    fn test_group_dynamic_count() {
        let codec = codec(GROUP_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let data = [2, 1, 0x2C, 0x01, 2, 0x90, 0x01];
        let map = codec.decode(&data, &layout).unwrap();

        assert_eq!(map.get("gun_count"), Some(&Value::UInt(2)));
        match map.get("gun_no_list") {
            Some(Value::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].get("gun_no"), Some(&Value::UInt(1)));
                assert_eq!(items[0].get("voltage"), Some(&Value::UInt(300)));
                assert_eq!(items[1].get("gun_no"), Some(&Value::UInt(2)));
                assert_eq!(items[1].get("voltage"), Some(&Value::UInt(400)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_group_count_one_merges() {
        let codec = codec(GROUP_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let map = codec.decode(&[1, 7, 0x2C, 0x01], &layout).unwrap();

        assert!(map.get("gun_no_list").is_none());
        assert_eq!(map.get("gun_no"), Some(&Value::UInt(7)));
        assert_eq!(map.get("voltage"), Some(&Value::UInt(300)));
    }

    #[test]
    fn test_group_count_zero_emits_nothing() {
        let codec = codec(GROUP_SCHEMA);
        let layout = codec.config().layout(1).unwrap().to_vec();
        let map = codec.decode(&[0], &layout).unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("gun_count"), Some(&Value::UInt(0)));
    }

    #[test]
    fn test_group_const_count() {
        let codec = codec(GROUP_SCHEMA);
        let layout = codec.config().layout(2).unwrap().to_vec();
        let map = codec.decode(&[5, 9], &layout).unwrap();
        match map.get("slot_list") {
            Some(Value::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].get("slot"), Some(&Value::UInt(5)));
                assert_eq!(items[1].get("slot"), Some(&Value::UInt(9)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_group_missing_context_field() {
        let codec = codec(GROUP_SCHEMA);
        let layout = codec.config().layout(3).unwrap().to_vec();
        let err = codec.decode(&[1, 2, 3], &layout).unwrap_err();
        assert!(matches!(err, DecoderError::MissingContextField(name) if name == "n"));
    }

    #[test]
    fn test_sibling_group_after_dynamic_group() {
        let schema = r#"
[meta]
protocol = "t"

[compatibility]
head_len = 1
frame_head = "AA"

[types.u]
base = "uint"

[cmds.1]
fields = [
    { len = 1, name = "count", type = "u", id = "n" },
    { repeat_by = "n", fields = [
        { len = 2, name = "reading", type = "u" },
    ] },
    { len = 1, name = "tail", type = "u" },
]
"#;
        let codec = codec(schema);
        let layout = codec.config().layout(1).unwrap().to_vec();
        // The group consumes exactly 2*2 bytes, so tail lands on 0x77
        let map = codec.decode(&[2, 0x01, 0x00, 0x02, 0x00, 0x77], &layout).unwrap();
        assert_eq!(map.get("tail"), Some(&Value::UInt(0x77)));
    }
}

//! # Bit-field formatter
//!
//! A [`Formatter`] describes a fixed-width binary record as a set of
//! named bit-fields and converts between the packed record and
//! human-readable key-value pairs.
//!
//! Each field occupies a bit range `start_bit..=end_bit` within the
//! record (bit 0 is the LSB of byte 0) and carries its own numeric
//! interpretation: hexadecimal, unsigned decimal, two's complement,
//! sign-magnitude, scaled float, or an enumeration of named values.
//! The field's [`Endianness`] governs the bit ordering of the value
//! *within* its range; it is independent of byte layout.
//!
//! Field values travel through a 64-bit signed cell from which the
//! textual rendering and the raw bit pattern are both derived. Fields
//! wider than 64 bits are not supported.
//!
//! Decoding may prepend a synthetic `"Decode Timestamp"` entry. The
//! wall-clock time is supplied by the caller, so decoding itself stays
//! deterministic and testable.

use chrono::{DateTime, Local};
use thiserror::Error;

use log::debug;

use crate::keyval::{KeyVal, KeyValList};

/// Key used for the synthetic timestamp entry
const TIMESTAMP_KEY: &str = "Decode Timestamp";

/// How a field's bits are interpreted and displayed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Format {
    /// Unsigned value presented in zero-padded hex
    #[strum(serialize = "hex")]
    Hex,

    /// Unsigned value presented in decimal
    #[strum(serialize = "unsigned decimal")]
    UnsignedDec,

    /// Sign-magnitude value, decimal; the field's MSB is the sign
    #[strum(serialize = "sign-magnitude")]
    SignMagnitude,

    /// Two's complement value, decimal
    #[strum(serialize = "two's complement")]
    TwosComplement,

    /// Scaled floating-point value; the field's MSB is the sign
    #[strum(serialize = "float")]
    Float,

    /// Enumerated values with symbolic names
    #[strum(serialize = "enum")]
    Enum,
}

/// Bit ordering of a value within its field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Endianness {
    /// The first bit of the range is the value's MSB
    #[strum(serialize = "big")]
    Big,

    /// The first bit of the range is the value's LSB
    #[strum(serialize = "little")]
    Little,
}

/// Timestamping mode for decoded messages
///
/// Timestamps reflect when the host decoded the message, not when the
/// signal arrived at the radio front-end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TimestampMode {
    /// Do not timestamp received messages
    #[strum(serialize = "none")]
    None,

    /// Integer seconds since the Unix epoch
    #[strum(serialize = "unix")]
    UnixInt,

    /// Fractional seconds since the Unix epoch
    #[strum(serialize = "unix-frac")]
    UnixFrac,

    /// Local date and 24-hour time
    #[strum(serialize = "datetime-24")]
    DateTime24,

    /// Local date and 12-hour time with AM/PM
    #[strum(serialize = "datetime-ampm")]
    DateTimeAmPm,
}

/// Errors raised while building or using a [`Formatter`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatterError {
    /// A formatter must describe at least one field
    #[error("formatter must be created for one or more fields")]
    NoFields,

    /// A formatter must cover at least one bit
    #[error("formatter cannot be created for a zero-bit record")]
    NoBits,

    /// All field slots are occupied
    #[error("no room left in formatter for field \"{0}\"")]
    TableFull(String),

    /// A field with this name already exists
    #[error("field \"{0}\" is already defined")]
    DuplicateField(String),

    /// `end_bit` precedes `start_bit`
    #[error("field \"{name}\": end bit {end_bit} precedes start bit {start_bit}")]
    InvalidRange {
        name: String,
        start_bit: u32,
        end_bit: u32,
    },

    /// Fields wider than 64 bits are not supported
    #[error("field \"{0}\" is wider than 64 bits")]
    TooWide(String),

    /// The field does not fit within the record
    #[error("field \"{name}\" ends at bit {end_bit} but the record is {max_bit} bits")]
    PastEndOfRecord {
        name: String,
        end_bit: u32,
        max_bit: u32,
    },

    /// An enumerated field must declare at least one entry
    #[error("enumerated field \"{0}\" declares no entries")]
    EmptyEnum(String),

    /// No field with this name exists
    #[error("unknown field \"{0}\"")]
    UnknownField(String),

    /// Enumeration entries were offered to a non-enumerated field
    #[error("field \"{0}\" is not an enumeration")]
    NotAnEnum(String),

    /// The enumeration table already holds its declared entry count
    #[error("enumeration table for field \"{0}\" is full")]
    EnumTableFull(String),

    /// The enumeration already contains this symbol
    #[error("field \"{field}\" already has an enumeration entry \"{symbol}\"")]
    DuplicateSymbol { field: String, symbol: String },

    /// A value string could not be parsed under the field's format
    #[error("invalid value for field \"{field}\": {value}")]
    InvalidValue { field: String, value: String },

    /// The parsed value does not fit within the field's bit width
    #[error("value is too large for field \"{field}\": {value}")]
    ValueOutOfRange { field: String, value: String },
}

/// One enumeration entry: a symbol and the field bits it stands for
#[derive(Clone, Debug)]
struct EnumEntry {
    symbol: String,
    value: i64,
}

#[derive(Clone, Debug)]
struct Field {
    name: String,
    start_bit: u32,
    end_bit: u32,
    format: Format,
    endianness: Endianness,
    scaling: f32,
    offset: f32,
    default_value: i64,
    enum_count: usize,
    enums: Vec<EnumEntry>,
}

impl Field {
    fn width(&self) -> u32 {
        self.end_bit - self.start_bit + 1
    }

    /// All-ones mask for the field's width
    fn mask(&self) -> u64 {
        if self.width() >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width()) - 1
        }
    }

    /// The field's own sign bit (MSB of the field, not of the cell)
    fn sign_bit(&self) -> u64 {
        1u64 << (self.width() - 1)
    }

    fn has_scaling(&self) -> bool {
        self.scaling != 1.0 || self.offset != 0.0
    }
}

/// Converts between packed binary records and key-value field lists
///
/// Created with a fixed field count and record width; fields are then
/// registered one at a time with [`add_field()`](Formatter::add_field),
/// enumeration entries with
/// [`add_field_enum()`](Formatter::add_field_enum), and defaults with
/// [`set_field_default()`](Formatter::set_field_default). Once
/// [`initialized()`](Formatter::initialized) reports `true` the
/// formatter is ready for [`data_to_keyval()`](Formatter::data_to_keyval)
/// and [`keyval_to_data()`](Formatter::keyval_to_data).
///
/// Fields may overlap; this is not checked.
#[derive(Clone, Debug)]
pub struct Formatter {
    fields: Vec<Field>,
    num_fields: usize,
    max_bit: u32,
    ts_mode: TimestampMode,
}

impl Formatter {
    /// Create a formatter for `num_fields` fields over a record of
    /// `max_bit` bits
    pub fn new(
        num_fields: usize,
        max_bit: u32,
        ts_mode: TimestampMode,
    ) -> Result<Self, FormatterError> {
        if num_fields == 0 {
            return Err(FormatterError::NoFields);
        }
        if max_bit == 0 {
            return Err(FormatterError::NoBits);
        }

        Ok(Self {
            fields: Vec::with_capacity(num_fields),
            num_fields,
            max_bit,
            ts_mode,
        })
    }

    /// Record length in whole bytes
    pub fn num_bytes(&self) -> usize {
        (self.max_bit as usize + 7) / 8
    }

    /// Register one field
    ///
    /// `enum_count` declares how many entries an enumerated field will
    /// receive via [`add_field_enum()`](Formatter::add_field_enum); it
    /// must be zero for other formats. A `scaling` of 0 means "no
    /// scaling configured" and is normalized to 1.0.
    #[allow(clippy::too_many_arguments)]
    pub fn add_field(
        &mut self,
        name: &str,
        start_bit: u32,
        end_bit: u32,
        format: Format,
        enum_count: usize,
        endianness: Endianness,
        scaling: f32,
        offset: f32,
    ) -> Result<(), FormatterError> {
        if self.find_field(name).is_some() {
            return Err(FormatterError::DuplicateField(name.to_string()));
        }
        if self.fields.len() == self.num_fields {
            return Err(FormatterError::TableFull(name.to_string()));
        }
        if end_bit < start_bit {
            return Err(FormatterError::InvalidRange {
                name: name.to_string(),
                start_bit,
                end_bit,
            });
        }
        if end_bit - start_bit + 1 > 64 {
            return Err(FormatterError::TooWide(name.to_string()));
        }
        if end_bit >= self.max_bit {
            return Err(FormatterError::PastEndOfRecord {
                name: name.to_string(),
                end_bit,
                max_bit: self.max_bit,
            });
        }
        if format == Format::Enum && enum_count == 0 {
            return Err(FormatterError::EmptyEnum(name.to_string()));
        }
        if format != Format::Enum && enum_count != 0 {
            return Err(FormatterError::NotAnEnum(name.to_string()));
        }

        self.fields.push(Field {
            name: name.to_string(),
            start_bit,
            end_bit,
            format,
            endianness,
            scaling: if scaling == 0.0 { 1.0 } else { scaling },
            offset,
            default_value: 0,
            enum_count,
            enums: Vec::with_capacity(enum_count),
        });

        Ok(())
    }

    /// Add one symbol/value pair to a field's enumeration table
    pub fn add_field_enum(
        &mut self,
        field_name: &str,
        symbol: &str,
        value: i64,
    ) -> Result<(), FormatterError> {
        let field = self
            .find_field_mut(field_name)
            .ok_or_else(|| FormatterError::UnknownField(field_name.to_string()))?;

        if field.format != Format::Enum {
            return Err(FormatterError::NotAnEnum(field_name.to_string()));
        }
        if field.enums.len() == field.enum_count {
            return Err(FormatterError::EnumTableFull(field_name.to_string()));
        }
        if field
            .enums
            .iter()
            .any(|e| e.symbol.eq_ignore_ascii_case(symbol))
        {
            return Err(FormatterError::DuplicateSymbol {
                field: field_name.to_string(),
                symbol: symbol.to_string(),
            });
        }

        field.enums.push(EnumEntry {
            symbol: symbol.to_string(),
            value,
        });
        Ok(())
    }

    /// Set a field's default value from its textual form
    ///
    /// Uses the same parsing rules as
    /// [`keyval_to_data()`](Formatter::keyval_to_data). Call after the
    /// field's format and enumeration table are final.
    pub fn set_field_default(
        &mut self,
        field_name: &str,
        default_value: &str,
    ) -> Result<(), FormatterError> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(field_name))
            .ok_or_else(|| FormatterError::UnknownField(field_name.to_string()))?;

        let value = parse_value(&self.fields[index], default_value)?;
        self.fields[index].default_value = value;
        Ok(())
    }

    /// Readiness check: all fields registered and enum tables complete
    pub fn initialized(&self) -> bool {
        if self.fields.len() != self.num_fields {
            debug!(
                "formatter has {} of {} fields",
                self.fields.len(),
                self.num_fields
            );
            return false;
        }

        for field in &self.fields {
            if field.enums.len() != field.enum_count {
                debug!(
                    "field \"{}\" has {} of {} enumeration entries",
                    field.name,
                    field.enums.len(),
                    field.enum_count
                );
                return false;
            }
        }

        true
    }

    /// Configured timestamping mode
    pub fn timestamp_mode(&self) -> TimestampMode {
        self.ts_mode
    }

    /// Decode a packed record into key-value pairs
    ///
    /// Appends one entry per field to `out`, preceded by a
    /// `"Decode Timestamp"` entry when timestamping is enabled. `now`
    /// is the wall-clock time to stamp the message with; callers
    /// normally pass `Local::now()`.
    ///
    /// `data` must be at least [`num_bytes()`](Formatter::num_bytes)
    /// long.
    pub fn data_to_keyval(&self, data: &[u8], now: DateTime<Local>, out: &mut KeyValList) {
        assert!(data.len() >= self.num_bytes(), "record buffer too short");

        if let Some(stamp) = render_timestamp(self.ts_mode, now) {
            out.append(KeyVal::new(TIMESTAMP_KEY, stamp));
        }

        for field in &self.fields {
            let bits = extract_field_bits(field, data);
            out.append(KeyVal::new(&field.name, render_value(field, bits)));
        }
    }

    /// Encode key-value pairs into a packed record
    ///
    /// Each entry's value string is parsed under its field's format and
    /// written into the field's bit range; bits outside named fields
    /// are left untouched. Unknown keys and unparseable or out-of-range
    /// values fail, stopping at the first bad entry.
    pub fn keyval_to_data(
        &self,
        params: &KeyValList,
        data: &mut [u8],
    ) -> Result<(), FormatterError> {
        assert!(data.len() >= self.num_bytes(), "record buffer too short");

        for kv in params {
            let field = self
                .find_field(&kv.key)
                .ok_or_else(|| FormatterError::UnknownField(kv.key.clone()))?;

            let value = parse_value(field, &kv.value)?;
            apply_field_bits(field, value as u64, data);
        }

        Ok(())
    }

    /// Write every field's default value into a packed record
    ///
    /// Used to seed a record before
    /// [`keyval_to_data()`](Formatter::keyval_to_data) overlays
    /// caller-supplied values.
    pub fn default_data(&self, data: &mut [u8]) {
        assert!(data.len() >= self.num_bytes(), "record buffer too short");

        for field in &self.fields {
            apply_field_bits(field, field.default_value as u64, data);
        }
    }

    fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    fn find_field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Extract a field's bits from a packed record
///
/// Walks the record bits `start_bit..=end_bit` (bit `i` lives at bit
/// `i % 8` of byte `i / 8`); big-endian fields fill the destination
/// cell MSB-first, little-endian LSB-first.
fn extract_field_bits(field: &Field, data: &[u8]) -> u64 {
    let mut dest_bit = match field.endianness {
        Endianness::Big => field.width() - 1,
        Endianness::Little => 0,
    };

    let mut out = 0u64;
    for i in field.start_bit..=field.end_bit {
        let byte = (i / 8) as usize;
        let src_bit = i % 8;

        out |= (((data[byte] >> src_bit) & 1) as u64) << dest_bit;

        dest_bit = match field.endianness {
            Endianness::Big => dest_bit.wrapping_sub(1),
            Endianness::Little => dest_bit + 1,
        };
    }

    out
}

/// Write a field's bits into a packed record, non-destructively to
/// bits outside the field's range
fn apply_field_bits(field: &Field, bits: u64, data: &mut [u8]) {
    let mut src_bit = match field.endianness {
        Endianness::Big => field.width() - 1,
        Endianness::Little => 0,
    };

    for i in field.start_bit..=field.end_bit {
        let byte = (i / 8) as usize;
        let bit = i % 8;

        if (bits >> src_bit) & 1 != 0 {
            data[byte] |= 1 << bit;
        } else {
            data[byte] &= !(1 << bit);
        }

        src_bit = match field.endianness {
            Endianness::Big => src_bit.wrapping_sub(1),
            Endianness::Little => src_bit + 1,
        };
    }
}

/// Sign-extend the low `width` bits of `bits`
fn sign_extend(bits: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

/// Parse an unsigned integer, accepting 0x/0o/0b prefixes
fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = text.strip_prefix("0o") {
        u64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else {
        text.parse().ok()
    }
}

/// Parse a signed integer, accepting 0x/0o/0b prefixes after the sign
fn parse_i64(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('-') {
        parse_u64(rest).map(|v| (v as i64).wrapping_neg())
    } else {
        parse_u64(text).map(|v| v as i64)
    }
}

/// Parse a value string into a field's 64-bit cell
///
/// The cell holds the raw field bits for sign-magnitude, float, and
/// enumerated fields, and the (possibly sign-extended) numeric value
/// for the others; in every case the low `width` bits are the bits
/// that enter the record.
fn parse_value(field: &Field, text: &str) -> Result<i64, FormatterError> {
    let invalid = || FormatterError::InvalidValue {
        field: field.name.clone(),
        value: text.to_string(),
    };
    let out_of_range = || FormatterError::ValueOutOfRange {
        field: field.name.clone(),
        value: text.to_string(),
    };

    let mask = field.mask();

    match field.format {
        Format::Hex | Format::UnsignedDec => {
            let mut tmp = parse_u64(text).ok_or_else(invalid)?;
            if field.has_scaling() {
                tmp = ((tmp as f32 - field.offset) / field.scaling) as u64;
            }
            if tmp & mask != tmp {
                return Err(out_of_range());
            }
            Ok(tmp as i64)
        }

        Format::Enum => {
            // symbol lookup first; fall back to a raw numeric parse
            let tmp = match field
                .enums
                .iter()
                .find(|e| e.symbol.eq_ignore_ascii_case(text.trim()))
            {
                Some(entry) => entry.value as u64,
                None => parse_u64(text).ok_or_else(invalid)?,
            };
            if tmp & mask != tmp {
                return Err(out_of_range());
            }
            Ok(tmp as i64)
        }

        Format::TwosComplement => {
            let mut tmp = parse_i64(text).ok_or_else(invalid)?;
            if field.has_scaling() {
                tmp = ((tmp as f32 - field.offset) / field.scaling) as i64;
            }
            // the value must survive truncation to the field's width
            if sign_extend(tmp as u64 & mask, field.width()) != tmp {
                return Err(out_of_range());
            }
            Ok(tmp)
        }

        Format::SignMagnitude => {
            let mut tmp = parse_i64(text).ok_or_else(invalid)?;
            if field.has_scaling() {
                tmp = ((tmp as f32 - field.offset) / field.scaling) as i64;
            }

            let magnitude = tmp.unsigned_abs();
            if magnitude > mask >> 1 {
                return Err(out_of_range());
            }

            let mut bits = magnitude;
            if tmp < 0 {
                bits |= field.sign_bit();
            }
            Ok(bits as i64)
        }

        Format::Float => {
            let parsed: f32 = text.trim().parse().map_err(|_| invalid())?;
            let scaled = (parsed - field.offset) / field.scaling;

            // truncating, like the integer formats
            let magnitude = scaled.abs() as u64;
            if magnitude > mask >> 1 {
                return Err(out_of_range());
            }

            let mut bits = magnitude;
            if scaled < 0.0 {
                bits |= field.sign_bit();
            }
            Ok(bits as i64)
        }
    }
}

/// Render a field's raw bits as a string per its format
fn render_value(field: &Field, bits: u64) -> String {
    match field.format {
        Format::Hex => render_hex(field, bits),

        Format::UnsignedDec => {
            let mut tmp = bits;
            if field.has_scaling() {
                tmp = (tmp as f64 * field.scaling as f64 + field.offset as f64) as u64;
            }
            format!("{}", tmp)
        }

        Format::TwosComplement => {
            // sign-extend from the field's own sign bit, not the cell's
            let mut tmp = sign_extend(bits, field.width());
            if field.has_scaling() {
                tmp = (tmp as f64 * field.scaling as f64 + field.offset as f64) as i64;
            }
            format!("{}", tmp)
        }

        Format::SignMagnitude => {
            let mut tmp = (bits & (field.mask() >> 1)) as i64;
            if bits & field.sign_bit() != 0 {
                tmp = -tmp;
            }
            if field.has_scaling() {
                tmp = (tmp as f64 * field.scaling as f64 + field.offset as f64) as i64;
            }
            format!("{}", tmp)
        }

        Format::Float => {
            let magnitude = (bits & (field.mask() >> 1)) as f32;
            let value = if bits & field.sign_bit() != 0 {
                magnitude * -field.scaling + field.offset
            } else {
                magnitude * field.scaling + field.offset
            };
            format!("{:.3}", value)
        }

        Format::Enum => match field.enums.iter().find(|e| e.value as u64 == bits) {
            Some(entry) => entry.symbol.clone(),
            None => render_hex(field, bits),
        },
    }
}

/// Zero-padded hex, width tier: two digits per started byte
fn render_hex(field: &Field, bits: u64) -> String {
    let mut tmp = bits;
    if field.has_scaling() {
        tmp = (tmp as f64 * field.scaling as f64 + field.offset as f64) as u64;
    }

    let digits = (2 * ((field.width() + 7) / 8)) as usize;
    format!("0x{:0digits$x}", tmp, digits = digits)
}

/// Render the synthetic decode timestamp, if enabled
fn render_timestamp(mode: TimestampMode, now: DateTime<Local>) -> Option<String> {
    match mode {
        TimestampMode::None => None,
        TimestampMode::UnixInt => Some(format!("{}", now.timestamp())),
        TimestampMode::UnixFrac => Some(format!(
            "{}.{:06}",
            now.timestamp(),
            now.timestamp_subsec_micros()
        )),
        TimestampMode::DateTime24 => Some(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        TimestampMode::DateTimeAmPm => Some(now.format("%Y-%m-%d %I:%M:%S %p").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2021, 3, 27, 22, 15, 0).unwrap()
    }

    /// One-field formatter over a 64-bit record
    fn single(format: Format, start: u32, end: u32, endianness: Endianness) -> Formatter {
        let mut f = Formatter::new(1, 64, TimestampMode::None).unwrap();
        f.add_field("Value", start, end, format, 0, endianness, 0.0, 0.0)
            .unwrap();
        assert!(f.initialized());
        f
    }

    fn decode_one(f: &Formatter, data: &[u8]) -> String {
        let mut out = KeyValList::new();
        f.data_to_keyval(data, fixed_now(), &mut out);
        assert_eq!(1, out.len());
        out.get(0).unwrap().value.clone()
    }

    fn round_trip(f: &Formatter, value: &str) -> String {
        let mut data = vec![0u8; f.num_bytes()];
        let params: KeyValList = [KeyVal::new("Value", value)].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();
        decode_one(f, &data)
    }

    #[test]
    fn test_string_forms() {
        assert_eq!(
            Format::TwosComplement,
            Format::from_str("Two's Complement").unwrap()
        );
        assert_eq!(
            Format::UnsignedDec,
            Format::from_str("unsigned decimal").unwrap()
        );
        assert_eq!(Endianness::Big, Endianness::from_str("BIG").unwrap());
        assert_eq!(
            TimestampMode::UnixFrac,
            TimestampMode::from_str("unix-frac").unwrap()
        );
        assert!(Format::from_str("decimal").is_err());
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            FormatterError::NoFields,
            Formatter::new(0, 8, TimestampMode::None).unwrap_err()
        );
        assert_eq!(
            FormatterError::NoBits,
            Formatter::new(1, 0, TimestampMode::None).unwrap_err()
        );

        let mut f = Formatter::new(1, 16, TimestampMode::None).unwrap();
        assert!(matches!(
            f.add_field("a", 4, 2, Format::Hex, 0, Endianness::Big, 0.0, 0.0),
            Err(FormatterError::InvalidRange { .. })
        ));
        assert!(matches!(
            f.add_field("a", 0, 64, Format::Hex, 0, Endianness::Big, 0.0, 0.0),
            Err(FormatterError::TooWide(_))
        ));
        assert!(matches!(
            f.add_field("a", 8, 16, Format::Hex, 0, Endianness::Big, 0.0, 0.0),
            Err(FormatterError::PastEndOfRecord { .. })
        ));

        f.add_field("a", 0, 7, Format::Hex, 0, Endianness::Big, 0.0, 0.0)
            .unwrap();
        assert!(matches!(
            f.add_field("A", 8, 15, Format::Hex, 0, Endianness::Big, 0.0, 0.0),
            Err(FormatterError::DuplicateField(_))
        ));
        assert!(matches!(
            f.add_field("b", 8, 15, Format::Hex, 0, Endianness::Big, 0.0, 0.0),
            Err(FormatterError::TableFull(_))
        ));
    }

    #[test]
    fn test_round_trip_all_formats_and_widths() {
        // representative widths from the single-bit to the full cell
        let cases: &[(Format, u32, &str)] = &[
            (Format::Hex, 1, "0x01"),
            (Format::Hex, 8, "0xa5"),
            (Format::Hex, 16, "0xbeef"),
            (Format::Hex, 33, "0x0100000001"),
            (Format::Hex, 64, "0xdeadbeefcafef00d"),
            (Format::UnsignedDec, 1, "1"),
            (Format::UnsignedDec, 8, "200"),
            (Format::UnsignedDec, 16, "65535"),
            (Format::UnsignedDec, 33, "4294967296"),
            (Format::UnsignedDec, 64, "18446744073709551615"),
            (Format::TwosComplement, 1, "-1"),
            (Format::TwosComplement, 8, "-128"),
            (Format::TwosComplement, 16, "-1"),
            (Format::TwosComplement, 33, "-4294967296"),
            (Format::TwosComplement, 64, "-9223372036854775808"),
            (Format::SignMagnitude, 8, "-127"),
            (Format::SignMagnitude, 16, "255"),
            (Format::SignMagnitude, 33, "-100000"),
            (Format::SignMagnitude, 64, "-1"),
            (Format::Float, 8, "101.000"),
            (Format::Float, 16, "-3000.000"),
            (Format::Float, 33, "1000000.000"),
        ];

        for &(format, width, value) in cases {
            for endianness in [Endianness::Big, Endianness::Little] {
                let f = single(format, 0, width - 1, endianness);
                assert_eq!(
                    value,
                    round_trip(&f, value),
                    "format {:?} width {} endianness {:?}",
                    format,
                    width,
                    endianness
                );
            }
        }
    }

    #[test]
    fn test_hex_width_tiers() {
        // two digits per started byte, 16-bit fields included
        let tiers: &[(u32, &str)] = &[
            (4, "0x05"),
            (8, "0x05"),
            (12, "0x0005"),
            (16, "0x0005"),
            (24, "0x000005"),
            (32, "0x00000005"),
            (40, "0x0000000005"),
            (64, "0x0000000000000005"),
        ];

        for &(width, expect) in tiers {
            let f = single(Format::Hex, 0, width - 1, Endianness::Little);
            let mut data = vec![0u8; f.num_bytes()];
            data[0] = 0x05;
            assert_eq!(expect, decode_one(&f, &data), "width {}", width);
        }
    }

    #[test]
    fn test_endianness_governs_bit_order() {
        // record bits 0 and 1 set, all others clear
        let little = single(Format::UnsignedDec, 0, 7, Endianness::Little);
        let mut data = vec![0u8; little.num_bytes()];
        data[0] = 0b0000_0011;

        // little-endian: record bit 0 is the value's LSB
        assert_eq!("3", decode_one(&little, &data));

        // big-endian: record bit 0 is the value's MSB
        let big = single(Format::UnsignedDec, 0, 7, Endianness::Big);
        assert_eq!("192", decode_one(&big, &data));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let f = single(Format::UnsignedDec, 0, 7, Endianness::Little);
        let mut data = [0u8; 8];
        let params: KeyValList = [KeyVal::new("Value", "256")].into_iter().collect();
        assert!(matches!(
            f.keyval_to_data(&params, &mut data),
            Err(FormatterError::ValueOutOfRange { .. })
        ));

        let f = single(Format::TwosComplement, 0, 7, Endianness::Little);
        let params: KeyValList = [KeyVal::new("Value", "-129")].into_iter().collect();
        assert!(matches!(
            f.keyval_to_data(&params, &mut data),
            Err(FormatterError::ValueOutOfRange { .. })
        ));

        let f = single(Format::SignMagnitude, 0, 7, Endianness::Little);
        let params: KeyValList = [KeyVal::new("Value", "128")].into_iter().collect();
        assert!(matches!(
            f.keyval_to_data(&params, &mut data),
            Err(FormatterError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_unknown_field_and_bad_value() {
        let f = single(Format::UnsignedDec, 0, 7, Endianness::Little);
        let mut data = [0u8; 8];

        let params: KeyValList = [KeyVal::new("Nope", "1")].into_iter().collect();
        assert!(matches!(
            f.keyval_to_data(&params, &mut data),
            Err(FormatterError::UnknownField(_))
        ));

        let params: KeyValList = [KeyVal::new("Value", "pickles")].into_iter().collect();
        assert!(matches!(
            f.keyval_to_data(&params, &mut data),
            Err(FormatterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_scaling_and_offset() {
        // raw 50 reads as 50 * 0.5 + 10 = 35; writing 35 stores 50
        let mut f = Formatter::new(1, 8, TimestampMode::None).unwrap();
        f.add_field(
            "Temp",
            0,
            7,
            Format::UnsignedDec,
            0,
            Endianness::Little,
            0.5,
            10.0,
        )
        .unwrap();

        let mut data = [0u8; 1];
        let params: KeyValList = [KeyVal::new("Temp", "35")].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();
        assert_eq!(50, data[0]);

        let mut out = KeyValList::new();
        f.data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("35"), out.value_of("Temp"));
    }

    #[test]
    fn test_enum_symbols_and_fallbacks() {
        let mut f = Formatter::new(1, 8, TimestampMode::None).unwrap();
        f.add_field("Button", 0, 3, Format::Enum, 2, Endianness::Little, 0.0, 0.0)
            .unwrap();
        assert!(!f.initialized());

        f.add_field_enum("Button", "open", 0x1).unwrap();
        f.add_field_enum("Button", "close", 0x2).unwrap();
        assert!(f.initialized());

        assert!(matches!(
            f.add_field_enum("Button", "again", 0x3),
            Err(FormatterError::EnumTableFull(_))
        ));

        // decode: known value renders the symbol
        let mut data = [0x02u8];
        let mut out = KeyValList::new();
        f.data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("close"), out.value_of("Button"));

        // decode: unknown value falls back to hex
        data[0] = 0x07;
        out.clear();
        f.data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("0x07"), out.value_of("Button"));

        // encode: symbol lookup, else raw numeric parse
        let params: KeyValList = [KeyVal::new("Button", "OPEN")].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();
        assert_eq!(0x01, data[0] & 0x0f);

        let params: KeyValList = [KeyVal::new("Button", "0x3")].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();
        assert_eq!(0x03, data[0] & 0x0f);
    }

    #[test]
    fn test_defaults_seed_record() {
        let mut f = Formatter::new(2, 16, TimestampMode::None).unwrap();
        f.add_field("Id", 0, 7, Format::Hex, 0, Endianness::Little, 0.0, 0.0)
            .unwrap();
        f.add_field("Cmd", 8, 15, Format::UnsignedDec, 0, Endianness::Little, 0.0, 0.0)
            .unwrap();
        f.set_field_default("Id", "0xc9").unwrap();
        f.set_field_default("Cmd", "7").unwrap();

        assert!(matches!(
            f.set_field_default("Missing", "1"),
            Err(FormatterError::UnknownField(_))
        ));
        assert!(matches!(
            f.set_field_default("Cmd", "888"),
            Err(FormatterError::ValueOutOfRange { .. })
        ));

        let mut data = [0xffu8; 2];
        f.default_data(&mut data);
        assert_eq!([0xc9, 0x07], data);
    }

    #[test]
    fn test_fields_do_not_disturb_neighbors() {
        let mut f = Formatter::new(1, 16, TimestampMode::None).unwrap();
        f.add_field("Mid", 4, 11, Format::Hex, 0, Endianness::Little, 0.0, 0.0)
            .unwrap();

        let mut data = [0xffu8; 2];
        let params: KeyValList = [KeyVal::new("Mid", "0x00")].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();
        assert_eq!([0x0f, 0xf0], data);
    }

    #[test]
    fn test_decode_timestamp_modes() {
        let mut data = [0u8; 1];
        data[0] = 1;

        let make = |mode| {
            let mut f = Formatter::new(1, 8, mode).unwrap();
            f.add_field("V", 0, 7, Format::UnsignedDec, 0, Endianness::Little, 0.0, 0.0)
                .unwrap();
            f
        };

        let mut out = KeyValList::new();
        make(TimestampMode::None).data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(None, out.value_of(TIMESTAMP_KEY));
        assert_eq!(1, out.len());

        out.clear();
        make(TimestampMode::UnixInt).data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(
            Some(fixed_now().timestamp().to_string().as_str()),
            out.value_of(TIMESTAMP_KEY)
        );
        assert_eq!(TIMESTAMP_KEY, out.get(0).unwrap().key);

        out.clear();
        make(TimestampMode::UnixFrac).data_to_keyval(&data, fixed_now(), &mut out);
        assert!(out.value_of(TIMESTAMP_KEY).unwrap().ends_with(".000000"));

        out.clear();
        make(TimestampMode::DateTime24).data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("2021-03-27 22:15:00"), out.value_of(TIMESTAMP_KEY));

        out.clear();
        make(TimestampMode::DateTimeAmPm).data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("2021-03-27 10:15:00 PM"), out.value_of(TIMESTAMP_KEY));
    }

    #[test]
    fn test_float_sign_bit() {
        let mut f = Formatter::new(1, 16, TimestampMode::None).unwrap();
        f.add_field("T", 0, 11, Format::Float, 0, Endianness::Little, 0.25, 0.0)
            .unwrap();

        let mut data = [0u8; 2];
        let params: KeyValList = [KeyVal::new("T", "-12.5")].into_iter().collect();
        f.keyval_to_data(&params, &mut data).unwrap();

        // -12.5 / 0.25 = -50: magnitude 50, sign in the field's MSB
        let mut out = KeyValList::new();
        f.data_to_keyval(&data, fixed_now(), &mut out);
        assert_eq!(Some("-12.500"), out.value_of("T"));
    }
}

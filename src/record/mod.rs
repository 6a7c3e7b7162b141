//! Simulation records and the snmprec line grammar.
//!
//! A data file holds one record per line, sorted strictly ascending by
//! OID:
//!
//! ```text
//! 1.3.6.1.2.1.1.1.0|4|Linux router
//! 1.3.6.1.2.1.1.3.0|2:volatile|42
//! 1.3.6.1.2.1.1.6.0|4x|4e6f7768657265
//! ```
//!
//! The tag field is an ASN.1 type code, optionally suffixed with `x`
//! (value is hex-encoded) and `:module` (value is produced by the named
//! variation module at lookup time).

mod index;
mod search;

pub use index::{IndexEntry, RecordIndex};
pub(crate) use index::LAST_KEY;
pub use search::{get_record, search_record_by_oid};

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::ParseErrorKind;
use crate::oid::Oid;
use crate::util::{HexDecodeError, decode_hex};
use crate::value::Value;

/// snmprec type codes (ASN.1 tag numbers).
pub mod type_code {
    pub const INTEGER: u8 = 2;
    pub const OCTET_STRING: u8 = 4;
    pub const NULL: u8 = 5;
    pub const OBJECT_IDENTIFIER: u8 = 6;
    pub const IP_ADDRESS: u8 = 64;
    pub const COUNTER32: u8 = 65;
    pub const GAUGE32: u8 = 66;
    pub const TIMETICKS: u8 = 67;
    pub const OPAQUE: u8 = 68;
    pub const COUNTER64: u8 = 70;
}

/// Parsed tag field: type code, hex flag, optional variation module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTag {
    /// ASN.1 type code.
    pub type_code: u8,
    /// Value field is hex-encoded.
    pub hex: bool,
    /// Variation module named by the tag, if any.
    pub module: Option<String>,
}

impl RecordTag {
    fn parse(text: &str) -> Result<Self, ParseErrorKind> {
        let (type_part, module) = match text.split_once(':') {
            Some((t, m)) if !m.is_empty() => (t, Some(m.to_string())),
            Some((t, _)) => (t, None),
            None => (text, None),
        };
        let (digits, hex) = match type_part.strip_suffix('x') {
            Some(d) => (d, true),
            None => (type_part, false),
        };
        let type_code: u8 = digits.parse().map_err(|_| ParseErrorKind::UnknownType {
            code: text.to_string(),
        })?;
        match type_code {
            type_code::INTEGER
            | type_code::OCTET_STRING
            | type_code::NULL
            | type_code::OBJECT_IDENTIFIER
            | type_code::IP_ADDRESS
            | type_code::COUNTER32
            | type_code::GAUGE32
            | type_code::TIMETICKS
            | type_code::OPAQUE
            | type_code::COUNTER64 => Ok(Self {
                type_code,
                hex,
                module,
            }),
            _ => Err(ParseErrorKind::UnknownType {
                code: text.to_string(),
            }),
        }
    }
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_code)?;
        if self.hex {
            write!(f, "x")?;
        }
        if let Some(module) = &self.module {
            write!(f, ":{}", module)?;
        }
        Ok(())
    }
}

/// One parsed data-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record's OID.
    pub oid: Oid,
    /// Tag field.
    pub tag: RecordTag,
    /// Raw value text, uninterpreted until [`Record::typed_value`] or a
    /// variation module consumes it.
    pub value: String,
}

impl Record {
    /// Interpret the record's own value field under its tag.
    pub fn typed_value(&self) -> Result<Value, ParseErrorKind> {
        self.typed_value_of(&self.value)
    }

    /// Interpret arbitrary value text under this record's tag. Variation
    /// modules use this to type configured response overrides.
    pub fn typed_value_of(&self, text: &str) -> Result<Value, ParseErrorKind> {
        let syntax = || ParseErrorKind::ValueSyntax {
            type_code: self.tag.type_code,
        };
        let octets = |text: &str| -> Result<Bytes, ParseErrorKind> {
            if self.tag.hex {
                decode_hex(text).map(Bytes::from).map_err(|e| match e {
                    HexDecodeError::OddLength => ParseErrorKind::OddHexLength,
                    HexDecodeError::InvalidChar => ParseErrorKind::BadHexDigit,
                })
            } else {
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            }
        };
        match self.tag.type_code {
            type_code::INTEGER => text.parse().map(Value::Integer).map_err(|_| syntax()),
            type_code::OCTET_STRING => octets(text).map(Value::OctetString),
            type_code::NULL => Ok(Value::Null),
            type_code::OBJECT_IDENTIFIER => {
                Oid::from_str(text).map(Value::ObjectIdentifier).map_err(|_| syntax())
            }
            type_code::IP_ADDRESS => text
                .parse::<Ipv4Addr>()
                .map(|addr| Value::IpAddress(addr.octets()))
                .map_err(|_| syntax()),
            type_code::COUNTER32 => text.parse().map(Value::Counter32).map_err(|_| syntax()),
            type_code::GAUGE32 => text.parse().map(Value::Gauge32).map_err(|_| syntax()),
            type_code::TIMETICKS => text.parse().map(Value::TimeTicks).map_err(|_| syntax()),
            type_code::OPAQUE => octets(text).map(Value::Opaque),
            type_code::COUNTER64 => text.parse().map(Value::Counter64).map_err(|_| syntax()),
            _ => Err(ParseErrorKind::UnknownType {
                code: self.tag.type_code.to_string(),
            }),
        }
    }
}

/// The snmprec line grammar.
///
/// Stateless; kept as a type so the controller and index builder share
/// one seam and alternative grammars stay pluggable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnmprecGrammar;

impl SnmprecGrammar {
    /// File extension this grammar registers under.
    pub const EXTENSION: &'static str = "snmprec";

    /// Parse a full record line.
    pub fn parse(&self, line: &str) -> Result<Record, ParseErrorKind> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.splitn(3, '|');
        let oid_text = fields.next().unwrap_or_default();
        let oid = Oid::from_str(oid_text).map_err(|_| ParseErrorKind::BadOid)?;
        let tag_text = fields.next().ok_or(ParseErrorKind::MissingTag)?;
        let tag = RecordTag::parse(tag_text)?;
        let value = fields.next().ok_or(ParseErrorKind::MissingValue)?;
        Ok(Record {
            oid,
            tag,
            value: value.to_string(),
        })
    }

    /// Parse only the OID column. Cheap path for index building and
    /// physical-successor checks.
    pub fn evaluate_oid(&self, line: &str) -> Result<Oid, ParseErrorKind> {
        let oid_text = line.split('|').next().unwrap_or_default();
        Oid::from_str(oid_text).map_err(|_| ParseErrorKind::BadOid)
    }
}

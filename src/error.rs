//! Error types for snmp-mimic.
//!
//! All errors are `#[non_exhaustive]` to allow adding new variants without
//! breaking changes. Two variants are control flow rather than failures:
//! [`Error::NoDataNotification`] tells the caller to drop the response
//! entirely, and [`Error::MibOperation`] carries an SNMP error-status for
//! the transport layer to encode. Both propagate out of
//! [`DataFile::process_var_binds`](crate::DataFile::process_var_binds)
//! unchanged.

use std::path::PathBuf;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// OID validation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidErrorKind {
    /// Empty OID string.
    Empty,
    /// Invalid arc value.
    InvalidArc,
    /// OID has too many arcs (exceeds MAX_OID_LEN).
    TooManyArcs { count: usize, max: usize },
}

impl std::fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::InvalidArc => write!(f, "invalid arc value"),
            Self::TooManyArcs { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
        }
    }
}

/// Record-grammar rejection kinds for a single data-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Line has no tag field.
    MissingTag,
    /// Line has no value field.
    MissingValue,
    /// OID field does not parse.
    BadOid,
    /// Unrecognized type code in the tag field.
    UnknownType { code: String },
    /// Value text does not parse under the tag's type code.
    ValueSyntax { type_code: u8 },
    /// Hex value with an odd number of digits.
    OddHexLength,
    /// Hex value with a non-hex digit.
    BadHexDigit,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTag => write!(f, "missing tag field"),
            Self::MissingValue => write!(f, "missing value field"),
            Self::BadOid => write!(f, "malformed OID field"),
            Self::UnknownType { code } => write!(f, "unknown type code {:?}", code),
            Self::ValueSyntax { type_code } => {
                write!(f, "value does not parse as type {}", type_code)
            }
            Self::OddHexLength => write!(f, "hex value has odd length"),
            Self::BadHexDigit => write!(f, "hex value has non-hex digit"),
        }
    }
}

/// Index corruption/staleness kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// No index file present.
    Missing,
    /// Index stamp does not match the data file (rebuild required).
    Stale,
    /// Index file line does not parse.
    Malformed { line: u64 },
    /// Data file records not strictly OID-ascending.
    OrderViolation { line: u64 },
    /// A prev-offset back reference does not strictly decrease.
    PrevChainViolation { key: String },
    /// A looked-up key that the index must contain is absent.
    MissingKey { key: String },
}

impl std::fmt::Display for IndexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "index file missing"),
            Self::Stale => write!(f, "index out of date"),
            Self::Malformed { line } => write!(f, "malformed index entry at line {}", line),
            Self::OrderViolation { line } => {
                write!(f, "records not strictly ascending at line {}", line)
            }
            Self::PrevChainViolation { key } => {
                write!(f, "non-decreasing prev-offset chain at {}", key)
            }
            Self::MissingKey { key } => write!(f, "no entry for {}, index broken?", key),
        }
    }
}

/// SNMP error status codes (RFC 3416).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    /// Unknown/future error status code.
    Unknown(i32),
}

impl ErrorStatus {
    /// Create from raw status code.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::TooBig,
            2 => Self::NoSuchName,
            3 => Self::BadValue,
            4 => Self::ReadOnly,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            16 => Self::AuthorizationError,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            other => Self::Unknown(other),
        }
    }

    /// Convert to raw status code.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::NoError => 0,
            Self::TooBig => 1,
            Self::NoSuchName => 2,
            Self::BadValue => 3,
            Self::ReadOnly => 4,
            Self::GenErr => 5,
            Self::NoAccess => 6,
            Self::WrongType => 7,
            Self::WrongLength => 8,
            Self::WrongEncoding => 9,
            Self::WrongValue => 10,
            Self::NoCreation => 11,
            Self::InconsistentValue => 12,
            Self::ResourceUnavailable => 13,
            Self::CommitFailed => 14,
            Self::UndoFailed => 15,
            Self::AuthorizationError => 16,
            Self::NotWritable => 17,
            Self::InconsistentName => 18,
            Self::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => write!(f, "noError"),
            Self::TooBig => write!(f, "tooBig"),
            Self::NoSuchName => write!(f, "noSuchName"),
            Self::BadValue => write!(f, "badValue"),
            Self::ReadOnly => write!(f, "readOnly"),
            Self::GenErr => write!(f, "genErr"),
            Self::NoAccess => write!(f, "noAccess"),
            Self::WrongType => write!(f, "wrongType"),
            Self::WrongLength => write!(f, "wrongLength"),
            Self::WrongEncoding => write!(f, "wrongEncoding"),
            Self::WrongValue => write!(f, "wrongValue"),
            Self::NoCreation => write!(f, "noCreation"),
            Self::InconsistentValue => write!(f, "inconsistentValue"),
            Self::ResourceUnavailable => write!(f, "resourceUnavailable"),
            Self::CommitFailed => write!(f, "commitFailed"),
            Self::UndoFailed => write!(f, "undoFailed"),
            Self::AuthorizationError => write!(f, "authorizationError"),
            Self::NotWritable => write!(f, "notWritable"),
            Self::InconsistentName => write!(f, "inconsistentName"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Data file missing or unreadable.
    #[error("data file {}: {source}", path.display())]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Index missing, stale, or corrupt.
    #[error("index for {}: {kind}", path.display())]
    Index { path: PathBuf, kind: IndexErrorKind },

    /// A data-file line the grammar rejects. The line number is known
    /// during index builds; lookups only know the seek offset.
    #[error("{}{}: {kind}", path.display(), line.map(|l| format!(":{}", l)).unwrap_or_default())]
    Parse {
        path: PathBuf,
        line: Option<u64>,
        kind: ParseErrorKind,
    },

    /// A variation module declines to answer; the caller must drop the
    /// response entirely rather than send an error varbind.
    #[error("module declined to answer; response withheld")]
    NoDataNotification,

    /// A variation module failed a MIB operation; the SNMP stack encodes
    /// the carried status into the response PDU.
    #[error("MIB operation failed: {0}")]
    MibOperation(ErrorStatus),

    /// A record's variation options are unusable; the record is inert.
    #[error("variation module {module}: {reason}")]
    VariationConfig {
        module: &'static str,
        reason: String,
    },

    /// A record's tag names a module the registry does not know.
    #[error("unknown variation module {0:?}")]
    UnknownVariationModule(String),

    /// Two data files derive the same agent identifier.
    #[error("duplicate agent identifier {ident:?}: {} and {}", first.display(), second.display())]
    DuplicateIdent {
        ident: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Invalid OID format.
    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        input: Option<Box<str>>, // Only allocated when parsing string input
    },
}

impl Error {
    /// Create a data-file I/O error.
    pub fn data_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DataFile {
            path: path.into(),
            source,
        }
    }

    /// Create an index error.
    pub fn index(path: impl Into<PathBuf>, kind: IndexErrorKind) -> Self {
        Self::Index {
            path: path.into(),
            kind,
        }
    }

    /// Create a parse error with file (and, when known, line) context.
    pub fn parse(
        path: impl Into<PathBuf>,
        line: impl Into<Option<u64>>,
        kind: ParseErrorKind,
    ) -> Self {
        Self::Parse {
            path: path.into(),
            line: line.into(),
            kind,
        }
    }

    /// Create a variation-config error.
    pub fn variation_config(module: &'static str, reason: impl Into<String>) -> Self {
        Self::VariationConfig {
            module,
            reason: reason.into(),
        }
    }

    /// Create an invalid OID error from a kind (no input string).
    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    /// Create an invalid OID error with the input string that failed.
    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// True for the two control-flow variants that the resolver must
    /// re-raise unchanged instead of converting to an error varbind.
    pub fn is_propagated(&self) -> bool {
        matches!(self, Self::NoDataNotification | Self::MibOperation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_roundtrip() {
        for code in 0..19 {
            assert_eq!(ErrorStatus::from_i32(code).as_i32(), code);
        }
        assert_eq!(ErrorStatus::from_i32(99), ErrorStatus::Unknown(99));
    }

    #[test]
    fn test_propagated_classification() {
        assert!(Error::NoDataNotification.is_propagated());
        assert!(Error::MibOperation(ErrorStatus::GenErr).is_propagated());
        assert!(!Error::invalid_oid(OidErrorKind::Empty).is_propagated());
    }

    #[test]
    fn test_display_context() {
        let err = Error::parse("/tmp/agent.snmprec", 7u64, ParseErrorKind::MissingTag);
        let text = err.to_string();
        assert!(text.contains("agent.snmprec"));
        assert!(text.contains(":7"));
        assert!(text.contains("missing tag"));
    }
}

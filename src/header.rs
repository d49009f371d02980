//! Volume head/tail header strings.
//!
//! A volume starts with `SIGNATURE || fields || SEP` and ends with
//! `SEP || fields || TERMINAL_SIGNATURE`.  The field text is a flat list of
//! `key=value` entries joined by `;`.  Entry order is preserved on both parse
//! and serialize, so a [`HeaderSet`] round-trips through its text exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest schema version this engine reads and the one it writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Terminates the head and opens the tail.  Outside printable ASCII and the
/// record tag range, so it never appears in header text and never doubles
/// as the end tag in front of a tail.
pub const SEPARATOR_BYTE: u8 = 0xB1;

pub const B1_AS: &str = "B1-AS";
pub const B1_VS: &str = "B1-VS";
pub const B1_AE: &str = "B1-AE";
pub const B1_VE: &str = "B1-VE";

/// All four signatures share this length.
pub const SIGNATURE_LEN: usize = B1_AS.len();

const FIELD_SEPARATOR: char = ';';
const KEY_VALUE_SEPARATOR: char = '=';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Malformed header entry: {0:?}")]
    MalformedEntry(String),
    #[error("Unknown header field: {0:?}")]
    UnknownField(String),
    #[error("Duplicate header field: {0}")]
    DuplicateField(&'static str),
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

// ── HeaderType ────────────────────────────────────────────────────────────────

/// Role of a header string inside its volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderType {
    /// Head of volume 1.
    #[serde(rename = "AS")]
    ArchiveStart,
    /// Head of volumes 2..N.
    #[serde(rename = "VS")]
    VolumeStart,
    /// Tail of the last volume.
    #[serde(rename = "AE")]
    ArchiveEnd,
    /// Tail of every other volume.
    #[serde(rename = "VE")]
    VolumeEnd,
}

impl HeaderType {
    pub fn code(self) -> &'static str {
        match self {
            HeaderType::ArchiveStart => "AS",
            HeaderType::VolumeStart  => "VS",
            HeaderType::ArchiveEnd   => "AE",
            HeaderType::VolumeEnd    => "VE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "AS" => Some(HeaderType::ArchiveStart),
            "VS" => Some(HeaderType::VolumeStart),
            "AE" => Some(HeaderType::ArchiveEnd),
            "VE" => Some(HeaderType::VolumeEnd),
            _    => None,
        }
    }

    /// The signature framing a header of this type.
    pub fn signature(self) -> &'static str {
        match self {
            HeaderType::ArchiveStart => B1_AS,
            HeaderType::VolumeStart  => B1_VS,
            HeaderType::ArchiveEnd   => B1_AE,
            HeaderType::VolumeEnd    => B1_VE,
        }
    }

    pub fn from_signature(signature: &str) -> Option<Self> {
        [
            HeaderType::ArchiveStart,
            HeaderType::VolumeStart,
            HeaderType::ArchiveEnd,
            HeaderType::VolumeEnd,
        ]
        .into_iter()
        .find(|t| t.signature() == signature)
    }

    /// Expected head type for a volume at `volume_number`.
    pub fn head_for(volume_number: u64) -> Self {
        if volume_number == 1 { HeaderType::ArchiveStart } else { HeaderType::VolumeStart }
    }
}

impl fmt::Display for HeaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── CatalogPointer ────────────────────────────────────────────────────────────

/// Where the first catalog record lives: a volume and an absolute byte
/// offset inside it.
///
/// Text form is the bare offset for volume 1 and `volume/offset` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPointer {
    pub volume_number: u64,
    pub offset:        u64,
}

impl CatalogPointer {
    pub fn new(volume_number: u64, offset: u64) -> Self {
        Self { volume_number, offset }
    }
}

impl fmt::Display for CatalogPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.volume_number == 1 {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}/{}", self.volume_number, self.offset)
        }
    }
}

impl FromStr for CatalogPointer {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HeaderError::InvalidValue { field: "catalogPointer", value: s.to_owned() };
        let (volume, offset) = match s.split_once('/') {
            Some((v, o)) => (parse_number(v).ok_or_else(invalid)?, o),
            None         => (1, s),
        };
        if volume == 0 {
            return Err(invalid());
        }
        let offset = parse_number(offset).ok_or_else(invalid)?;
        Ok(Self::new(volume, offset))
    }
}

// ── HeaderSet ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderEntry {
    Type(HeaderType),
    SchemaVersion(u32),
    ArchiveId(String),
    VolumeNumber(u64),
    CatalogPointer(CatalogPointer),
}

impl HeaderEntry {
    fn key(&self) -> &'static str {
        match self {
            HeaderEntry::Type(_)           => "type",
            HeaderEntry::SchemaVersion(_)  => "version",
            HeaderEntry::ArchiveId(_)      => "archiveId",
            HeaderEntry::VolumeNumber(_)   => "volumeNumber",
            HeaderEntry::CatalogPointer(_) => "catalogPointer",
        }
    }

    fn parse(key: &str, value: &str) -> Result<Self, HeaderError> {
        let bad = |field: &'static str| HeaderError::InvalidValue { field, value: value.to_owned() };
        match key {
            "type" => HeaderType::from_code(value).map(HeaderEntry::Type).ok_or_else(|| bad("type")),
            "version" => parse_number(value)
                .and_then(|v| u32::try_from(v).ok())
                .map(HeaderEntry::SchemaVersion)
                .ok_or_else(|| bad("version")),
            "archiveId" => {
                if is_valid_value(value) {
                    Ok(HeaderEntry::ArchiveId(value.to_owned()))
                } else {
                    Err(bad("archiveId"))
                }
            }
            "volumeNumber" => parse_number(value)
                .filter(|&n| n > 0)
                .map(HeaderEntry::VolumeNumber)
                .ok_or_else(|| bad("volumeNumber")),
            "catalogPointer" => value.parse().map(HeaderEntry::CatalogPointer),
            other => Err(HeaderError::UnknownField(other.to_owned())),
        }
    }
}

impl fmt::Display for HeaderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.key(), KEY_VALUE_SEPARATOR)?;
        match self {
            HeaderEntry::Type(t)           => write!(f, "{t}"),
            HeaderEntry::SchemaVersion(v)  => write!(f, "{v}"),
            HeaderEntry::ArchiveId(id)     => f.write_str(id),
            HeaderEntry::VolumeNumber(n)   => write!(f, "{n}"),
            HeaderEntry::CatalogPointer(p) => write!(f, "{p}"),
        }
    }
}

/// Ordered set of header fields parsed from one head or tail string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<HeaderEntry>,
}

/// Flat view used for JSON output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSummary {
    #[serde(rename = "type")]
    pub header_type:     Option<HeaderType>,
    pub version:         Option<u32>,
    pub archive_id:      Option<String>,
    pub volume_number:   Option<u64>,
    pub catalog_pointer: Option<CatalogPointer>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields a writer puts in a volume head.
    pub fn head(header_type: HeaderType, archive_id: &str, volume_number: u64) -> Result<Self, HeaderError> {
        let mut set = Self::new();
        set.set_header_type(header_type);
        set.set_schema_version(SCHEMA_VERSION);
        set.set_archive_id(archive_id)?;
        set.set_volume_number(volume_number);
        Ok(set)
    }

    /// Fields a writer puts in a volume tail.
    pub fn tail(header_type: HeaderType, catalog_pointer: Option<CatalogPointer>) -> Self {
        let mut set = Self::new();
        if let Some(pointer) = catalog_pointer {
            set.set_catalog_pointer(pointer);
        }
        set.set_header_type(header_type);
        set
    }

    pub fn header_type(&self) -> Option<HeaderType> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::Type(t) => Some(*t),
            _ => None,
        })
    }

    pub fn schema_version(&self) -> Option<u32> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::SchemaVersion(v) => Some(*v),
            _ => None,
        })
    }

    pub fn archive_id(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::ArchiveId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn volume_number(&self) -> Option<u64> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::VolumeNumber(n) => Some(*n),
            _ => None,
        })
    }

    pub fn catalog_pointer(&self) -> Option<CatalogPointer> {
        self.entries.iter().find_map(|e| match e {
            HeaderEntry::CatalogPointer(p) => Some(*p),
            _ => None,
        })
    }

    pub fn set_header_type(&mut self, value: HeaderType) {
        self.put(HeaderEntry::Type(value));
    }

    pub fn set_schema_version(&mut self, value: u32) {
        self.put(HeaderEntry::SchemaVersion(value));
    }

    pub fn set_archive_id(&mut self, value: &str) -> Result<(), HeaderError> {
        if !is_valid_value(value) {
            return Err(HeaderError::InvalidValue { field: "archiveId", value: value.to_owned() });
        }
        self.put(HeaderEntry::ArchiveId(value.to_owned()));
        Ok(())
    }

    pub fn set_volume_number(&mut self, value: u64) {
        self.put(HeaderEntry::VolumeNumber(value));
    }

    pub fn set_catalog_pointer(&mut self, value: CatalogPointer) {
        self.put(HeaderEntry::CatalogPointer(value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> HeaderSummary {
        HeaderSummary {
            header_type:     self.header_type(),
            version:         self.schema_version(),
            archive_id:      self.archive_id().map(str::to_owned),
            volume_number:   self.volume_number(),
            catalog_pointer: self.catalog_pointer(),
        }
    }

    fn put(&mut self, entry: HeaderEntry) {
        match self.entries.iter_mut().find(|e| e.key() == entry.key()) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{FIELD_SEPARATOR}")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

impl FromStr for HeaderSet {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = HeaderSet::new();
        if s.is_empty() {
            return Ok(set);
        }
        for raw in s.split(FIELD_SEPARATOR) {
            let (key, value) = raw
                .split_once(KEY_VALUE_SEPARATOR)
                .ok_or_else(|| HeaderError::MalformedEntry(raw.to_owned()))?;
            let entry = HeaderEntry::parse(key, value)?;
            if set.entries.iter().any(|e| e.key() == entry.key()) {
                return Err(HeaderError::DuplicateField(entry.key()));
            }
            set.entries.push(entry);
        }
        Ok(set)
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Printable ASCII other than the grammar's own delimiters.
fn is_valid_value(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            (0x21..=0x7e).contains(&b)
                && b != FIELD_SEPARATOR as u8
                && b != KEY_VALUE_SEPARATOR as u8
        })
}

/// Plain decimal digits only; no sign, no whitespace.
fn parse_number(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_head_fields_in_order() {
        let set: HeaderSet = "type=AS;version=1;archiveId=X;volumeNumber=1".parse().unwrap();
        assert_eq!(set.header_type(), Some(HeaderType::ArchiveStart));
        assert_eq!(set.schema_version(), Some(1));
        assert_eq!(set.archive_id(), Some("X"));
        assert_eq!(set.volume_number(), Some(1));
        assert_eq!(set.catalog_pointer(), None);
        assert_eq!(set.to_string(), "type=AS;version=1;archiveId=X;volumeNumber=1");
    }

    #[test]
    fn tail_text_keeps_pointer_first() {
        let set = HeaderSet::tail(HeaderType::ArchiveEnd, Some(CatalogPointer::new(1, 0)));
        assert_eq!(set.to_string(), "catalogPointer=0;type=AE");
        let parsed: HeaderSet = set.to_string().parse().unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn catalog_pointer_text_forms() {
        assert_eq!("42".parse::<CatalogPointer>().unwrap(), CatalogPointer::new(1, 42));
        assert_eq!("3/77".parse::<CatalogPointer>().unwrap(), CatalogPointer::new(3, 77));
        assert_eq!(CatalogPointer::new(3, 77).to_string(), "3/77");
        assert_eq!(CatalogPointer::new(1, 9).to_string(), "9");
        assert!("0/5".parse::<CatalogPointer>().is_err());
        assert!("-1".parse::<CatalogPointer>().is_err());
        assert!("".parse::<CatalogPointer>().is_err());
    }

    #[test]
    fn rejects_unknown_and_duplicate_fields() {
        assert_eq!(
            "acatalogPointer=0;type=AE".parse::<HeaderSet>(),
            Err(HeaderError::UnknownField("acatalogPointer".into()))
        );
        assert_eq!(
            "type=AE;type=VE".parse::<HeaderSet>(),
            Err(HeaderError::DuplicateField("type"))
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!("type=AS;".parse::<HeaderSet>().is_err());
        assert!("typeAS".parse::<HeaderSet>().is_err());
        assert!("volumeNumber=0".parse::<HeaderSet>().is_err());
        assert!("volumeNumber=1\u{1}".parse::<HeaderSet>().is_err());
        assert!("version= 1".parse::<HeaderSet>().is_err());
        assert!("archiveId=".parse::<HeaderSet>().is_err());
    }

    #[test]
    fn archive_id_must_be_framable() {
        assert!(HeaderSet::head(HeaderType::ArchiveStart, "a;b", 1).is_err());
        assert!(HeaderSet::new().set_archive_id("").is_err());
    }

    #[test]
    fn empty_text_is_empty_set() {
        assert!("".parse::<HeaderSet>().unwrap().is_empty());
    }

    #[test]
    fn setters_replace_in_place() {
        let mut set = HeaderSet::head(HeaderType::ArchiveStart, "abc", 1).unwrap();
        set.set_volume_number(2);
        assert_eq!(set.to_string(), "type=AS;version=1;archiveId=abc;volumeNumber=2");
        set.set_catalog_pointer(CatalogPointer::new(2, 10));
        assert!(set.to_string().ends_with(";catalogPointer=2/10"));
    }

    #[test]
    fn signatures_map_to_types() {
        for t in [
            HeaderType::ArchiveStart,
            HeaderType::VolumeStart,
            HeaderType::ArchiveEnd,
            HeaderType::VolumeEnd,
        ] {
            assert_eq!(t.signature().len(), SIGNATURE_LEN);
            assert_eq!(HeaderType::from_signature(t.signature()), Some(t));
            assert_eq!(HeaderType::from_code(t.code()), Some(t));
        }
        assert_eq!(HeaderType::head_for(1), HeaderType::ArchiveStart);
        assert_eq!(HeaderType::head_for(7), HeaderType::VolumeStart);
    }
}

//! Catalog and complete records.
//!
//! Every record starts with a [`RecordTag`].  An archive body is two
//! sections, each closed by [`RecordTag::End`]:
//!
//! ```text
//! catalog:   (CatalogFolder | CatalogFile)* End
//! complete:  (CompleteFolder | CompleteFile | VolumeBreak)* End
//! ```
//!
//! A catalog file record ends with its size field.  When the size is unknown
//! at catalog time the field is a [`DeferredSlot`] resolved by
//! [`write_complete_file`] once the content has been copied.

use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::error::{PackError, Result};
use crate::io_stream::{ChunkedWriter, DeferredSlot, RecordWriter, VolumeSink};
use crate::number::{read_i64, read_string, read_u64, write_i64, write_str, write_u64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    End,
    CatalogFolder,
    CatalogFile,
    CompleteFolder,
    CompleteFile,
    /// Body continues after the head of the next volume.
    VolumeBreak,
}

impl RecordTag {
    pub fn code(self) -> u64 {
        match self {
            RecordTag::End            => 0,
            RecordTag::CatalogFolder  => 1,
            RecordTag::CatalogFile    => 2,
            RecordTag::CompleteFolder => 3,
            RecordTag::CompleteFile   => 4,
            RecordTag::VolumeBreak    => 5,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(RecordTag::End),
            1 => Some(RecordTag::CatalogFolder),
            2 => Some(RecordTag::CatalogFile),
            3 => Some(RecordTag::CompleteFolder),
            4 => Some(RecordTag::CompleteFile),
            5 => Some(RecordTag::VolumeBreak),
            _ => None,
        }
    }

    pub fn write<W: Write + ?Sized>(self, writer: &mut W) -> io::Result<()> {
        write_u64(writer, self.code())
    }

    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let code = read_u64(reader)?;
        Self::from_code(code).ok_or_else(|| PackError::InvalidRecord(format!("unknown record tag {code}")))
    }
}

// ── Entries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File { size: u64 },
}

/// One folder or file as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id:            u64,
    pub parent_id:     Option<u64>,
    pub name:          String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: Option<i64>,
    #[serde(flatten)]
    pub kind:          EntryKind,
}

impl CatalogEntry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    pub fn size(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File { size } => Some(size),
            EntryKind::Folder => None,
        }
    }
}

/// Structural fields shared by both catalog record kinds.
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader<'a> {
    pub id:            u64,
    pub parent_id:     Option<u64>,
    pub name:          &'a str,
    pub last_modified: Option<i64>,
}

/// What follows the structural fields of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Folder,
    /// `None` reserves a deferred slot for the size.
    File { size: Option<u64> },
}

/// Record heads of the complete section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteRecord {
    Folder { id: u64 },
    /// A content body follows.
    File { id: u64 },
    VolumeBreak,
    End,
}

// ── Catalog phase ────────────────────────────────────────────────────────────

/// Emit one catalog record.  Returns the slot reserved for an unknown file
/// size; the caller hands it to [`write_complete_file`].
pub fn write_catalog_record<S: VolumeSink>(
    writer: &mut RecordWriter<S>,
    header: &EntryHeader<'_>,
    kind:   CatalogKind,
) -> Result<Option<DeferredSlot>> {
    let tag = match kind {
        CatalogKind::Folder      => RecordTag::CatalogFolder,
        CatalogKind::File { .. } => RecordTag::CatalogFile,
    };
    tag.write(writer)?;
    write_u64(writer, header.id)?;
    write_u64(writer, header.parent_id.unwrap_or(0))?;
    write_str(writer, header.name)?;
    match header.last_modified {
        Some(millis) => {
            writer.write_u8(1)?;
            write_i64(writer, millis)?;
        }
        None => writer.write_u8(0)?,
    }
    match kind {
        CatalogKind::Folder => Ok(None),
        CatalogKind::File { size: Some(size) } => {
            write_u64(writer, size)?;
            Ok(None)
        }
        CatalogKind::File { size: None } => Ok(Some(writer.reserve_long()?)),
    }
}

/// Read one catalog record; `None` at the end of the catalog section.
pub fn read_catalog_record<R: Read + ?Sized>(reader: &mut R) -> Result<Option<CatalogEntry>> {
    let tag = RecordTag::read(reader)?;
    if tag == RecordTag::End {
        return Ok(None);
    }
    if !matches!(tag, RecordTag::CatalogFolder | RecordTag::CatalogFile) {
        return Err(PackError::InvalidRecord(format!("{tag:?} inside the catalog section")));
    }
    let id = read_u64(reader)?;
    let parent_id = match read_u64(reader)? {
        0 => None,
        parent => Some(parent),
    };
    let name = read_string(reader)?;
    let last_modified = match reader.read_u8()? {
        0 => None,
        1 => Some(read_i64(reader)?),
        flag => return Err(PackError::InvalidRecord(format!("bad timestamp flag {flag} on entry {id}"))),
    };
    let kind = if tag == RecordTag::CatalogFile {
        EntryKind::File { size: read_u64(reader)? }
    } else {
        EntryKind::Folder
    };
    Ok(Some(CatalogEntry { id, parent_id, name, last_modified, kind }))
}

// ── Complete phase ───────────────────────────────────────────────────────────

pub fn write_complete_folder<S: VolumeSink>(writer: &mut RecordWriter<S>, id: u64) -> Result<()> {
    RecordTag::CompleteFolder.write(writer)?;
    write_u64(writer, id)?;
    Ok(())
}

/// Emit a complete file record and return the number of content bytes.
///
/// With a declared `size` the body is `[size][bytes][0]` and the source must
/// produce exactly that many bytes.  Without one the source is framed by a
/// [`ChunkedWriter`] and `slot`, if any, is resolved with the copied total.
pub fn write_complete_file<S: VolumeSink>(
    writer:         &mut RecordWriter<S>,
    id:             u64,
    source:         &mut dyn Read,
    size:           Option<u64>,
    slot:           Option<DeferredSlot>,
    max_chunk_size: usize,
) -> Result<u64> {
    RecordTag::CompleteFile.write(writer)?;
    write_u64(writer, id)?;

    let size = match size {
        Some(size) => {
            // An empty body is the terminator alone, as in the chunked form.
            if size > 0 {
                write_u64(writer, size)?;
                let copied = io::copy(&mut (&mut *source).take(size), writer)?;
                if copied < size {
                    return Err(PackError::SizeMismatch { expected: size, actual: copied });
                }
            }
            let extra = io::copy(source, &mut io::sink())?;
            if extra > 0 {
                return Err(PackError::SizeMismatch { expected: size, actual: size + extra });
            }
            write_u64(writer, 0)?;
            size
        }
        None => {
            let mut chunked = ChunkedWriter::new(&mut *writer, max_chunk_size);
            io::copy(source, &mut chunked)?;
            chunked.finish()?
        }
    };

    if let Some(slot) = slot {
        writer.resolve(slot, size)?;
    }
    Ok(size)
}

/// Read the head of the next complete-section record.  For
/// [`CompleteRecord::File`] the content body is left unread.
pub fn read_complete_record<R: Read + ?Sized>(reader: &mut R) -> Result<CompleteRecord> {
    match RecordTag::read(reader)? {
        RecordTag::CompleteFolder => Ok(CompleteRecord::Folder { id: read_u64(reader)? }),
        RecordTag::CompleteFile   => Ok(CompleteRecord::File { id: read_u64(reader)? }),
        RecordTag::VolumeBreak    => Ok(CompleteRecord::VolumeBreak),
        RecordTag::End            => Ok(CompleteRecord::End),
        tag => Err(PackError::InvalidRecord(format!("{tag:?} inside the complete section"))),
    }
}

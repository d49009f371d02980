//! Write side: planned, single-pass archive writer.
//!
//! Entries are registered up front; [`ArchiveWriter::finish`] then emits
//! every catalog record, every complete record and the tails in one pass:
//!
//! ```text
//! volume 1:  B1-AS head SEP  catalog* End  complete* [VolumeBreak SEP tail B1-VE]
//! volume k:  B1-VS head SEP  complete*     [VolumeBreak SEP tail B1-VE]
//! last:      ...             complete* End  SEP catalogPointer;type=AE B1-AE
//! ```
//!
//! Sizes that are not known before the content is copied are written as
//! deferred slots in the catalog and patched afterwards, so the catalog
//! always precedes the content it describes.
//!
//! ```no_run
//! use b1pack::io_stream::StreamSink;
//! use b1pack::writer::{ArchiveWriter, Content, WriterOptions};
//!
//! let stdout_like = |_: u64| -> std::io::Result<StreamSink<Vec<u8>>> { Ok(StreamSink::new(Vec::new())) };
//! let mut writer = ArchiveWriter::new(stdout_like, WriterOptions::default());
//! let docs = writer.add_folder(None, "docs", None)?;
//! writer.add_file(Some(docs), "a.txt", None, Content::from_bytes(b"hello"))?;
//! let written = writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read, Write};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PackError, Result};
use crate::explorer::MAX_HEAD_SIZE;
use crate::header::{CatalogPointer, HeaderSet, HeaderType, SEPARATOR_BYTE, SIGNATURE_LEN};
use crate::io_stream::{DeferredSlot, RecordWriter, VolumeSink, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_STAGING_LIMIT};
use crate::record::{
    write_catalog_record, write_complete_file, write_complete_folder, CatalogKind, EntryHeader, RecordTag,
};

// ── WriterOptions ────────────────────────────────────────────────────────────

/// Configuration for [`ArchiveWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Largest chunk payload for content of unknown size.
    pub max_chunk_size:  usize,
    /// Soft limit: a new volume is started before the next complete record
    /// once a volume has reached this size.  `None` writes one volume.
    ///
    /// When set, files of unknown size are copied ahead of the others so
    /// their catalog slots are resolved before the first rollover.
    pub max_volume_size: Option<u64>,
    /// Staged bytes pushed to the sink once this much has accumulated.
    pub staging_limit:   usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_chunk_size:  DEFAULT_MAX_CHUNK_SIZE,
            max_volume_size: None,
            staging_limit:   DEFAULT_STAGING_LIMIT,
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────────

/// Hands out the sink for each volume, by 1-based number, as the writer
/// reaches it.
pub trait WriterProvider {
    type Sink: VolumeSink;

    fn volume(&mut self, volume_number: u64) -> io::Result<Self::Sink>;
}

impl<F, S> WriterProvider for F
where
    F: FnMut(u64) -> io::Result<S>,
    S: VolumeSink,
{
    type Sink = S;

    fn volume(&mut self, volume_number: u64) -> io::Result<S> {
        self(volume_number)
    }
}

// ── Content ──────────────────────────────────────────────────────────────────

enum Source<'a> {
    Reader(Box<dyn Read + 'a>),
    Deferred(Box<dyn FnOnce() -> io::Result<Box<dyn Read + 'a>> + 'a>),
}

/// File content, with its size when known in advance.
pub struct Content<'a> {
    size:   Option<u64>,
    source: Source<'a>,
}

impl<'a> Content<'a> {
    /// `reader` must produce exactly `size` bytes.
    pub fn sized<R: Read + 'a>(size: u64, reader: R) -> Self {
        Self { size: Some(size), source: Source::Reader(Box::new(reader)) }
    }

    /// Size discovered while copying; written as chunks.
    pub fn streamed<R: Read + 'a>(reader: R) -> Self {
        Self { size: None, source: Source::Reader(Box::new(reader)) }
    }

    /// The reader is only created when the content is copied, so many
    /// entries can be registered without holding them all open.
    pub fn deferred<F, R>(size: Option<u64>, open: F) -> Self
    where
        F: FnOnce() -> io::Result<R> + 'a,
        R: Read + 'a,
    {
        let open = move || -> io::Result<Box<dyn Read + 'a>> { Ok(Box::new(open()?)) };
        Self { size, source: Source::Deferred(Box::new(open)) }
    }

    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::sized(bytes.len() as u64, bytes)
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    fn open(self) -> io::Result<Box<dyn Read + 'a>> {
        match self.source {
            Source::Reader(reader) => Ok(reader),
            Source::Deferred(open) => open(),
        }
    }
}

// ── ArchiveWriter ────────────────────────────────────────────────────────────

struct PlannedEntry<'a> {
    id:            u64,
    parent_id:     Option<u64>,
    name:          String,
    last_modified: Option<i64>,
    /// `None` for folders.
    content:       Option<Content<'a>>,
}

impl PlannedEntry<'_> {
    fn header(&self) -> EntryHeader<'_> {
        EntryHeader {
            id:            self.id,
            parent_id:     self.parent_id,
            name:          &self.name,
            last_modified: self.last_modified,
        }
    }

    fn catalog_kind(&self) -> CatalogKind {
        match &self.content {
            None => CatalogKind::Folder,
            Some(content) => CatalogKind::File { size: content.size() },
        }
    }
}

/// What [`ArchiveWriter::finish`] produced.
#[derive(Debug)]
pub struct WrittenArchive<S> {
    pub archive_id:      String,
    pub catalog_pointer: CatalogPointer,
    /// Finished sinks, volume 1 first.
    pub volumes:         Vec<S>,
    /// Content bytes copied across all files.
    pub content_bytes:   u64,
}

pub struct ArchiveWriter<'a, P: WriterProvider> {
    provider:   P,
    options:    WriterOptions,
    archive_id: String,
    entries:    Vec<PlannedEntry<'a>>,
}

impl<'a, P: WriterProvider> ArchiveWriter<'a, P> {
    /// Writer with a fresh random archive id.
    pub fn new(provider: P, options: WriterOptions) -> Self {
        Self {
            provider,
            options,
            archive_id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn with_archive_id(provider: P, options: WriterOptions, archive_id: &str) -> Result<Self> {
        let widest = HeaderSet::head(HeaderType::VolumeStart, archive_id, u64::MAX)?;
        if SIGNATURE_LEN + widest.to_string().len() > MAX_HEAD_SIZE {
            return Err(PackError::InvalidEntry(format!(
                "archive id of {} bytes does not fit a volume head",
                archive_id.len()
            )));
        }
        Ok(Self {
            provider,
            options,
            archive_id: archive_id.to_owned(),
            entries: Vec::new(),
        })
    }

    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    /// Register a folder and return its entry id.
    pub fn add_folder(&mut self, parent_id: Option<u64>, name: &str, last_modified: Option<i64>) -> Result<u64> {
        self.push(parent_id, name, last_modified, None)
    }

    /// Register a file and return its entry id.
    pub fn add_file(
        &mut self,
        parent_id:     Option<u64>,
        name:          &str,
        last_modified: Option<i64>,
        content:       Content<'a>,
    ) -> Result<u64> {
        self.push(parent_id, name, last_modified, Some(content))
    }

    fn push(
        &mut self,
        parent_id:     Option<u64>,
        name:          &str,
        last_modified: Option<i64>,
        content:       Option<Content<'a>>,
    ) -> Result<u64> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
            return Err(PackError::InvalidEntry(format!("unusable entry name {name:?}")));
        }
        if let Some(parent) = parent_id {
            // Ids are 1-based positions in `entries`.
            match self.entries.get((parent as usize).wrapping_sub(1)) {
                Some(entry) if entry.content.is_none() => {}
                Some(_) => return Err(PackError::InvalidEntry(format!("parent {parent} is a file"))),
                None => return Err(PackError::NotFound(format!("parent entry {parent}"))),
            }
        }
        let id = self.entries.len() as u64 + 1;
        self.entries.push(PlannedEntry { id, parent_id, name: name.to_owned(), last_modified, content });
        Ok(id)
    }

    /// Write the whole archive and return the finished sinks.
    pub fn finish(self) -> Result<WrittenArchive<P::Sink>> {
        let ArchiveWriter { mut provider, options, archive_id, entries } = self;

        let mut volumes = Vec::new();
        let mut volume_number = 1;
        let mut writer = open_volume(&mut provider, &options, &archive_id, volume_number)?;
        let catalog_pointer = CatalogPointer::new(1, writer.position());

        let mut slots: Vec<Option<DeferredSlot>> = Vec::with_capacity(entries.len());
        for entry in &entries {
            slots.push(write_catalog_record(&mut writer, &entry.header(), entry.catalog_kind())?);
        }
        RecordTag::End.write(&mut writer)?;
        debug!(
            entries = entries.len(),
            catalog_end = writer.position(),
            staged = writer.staged_len(),
            "catalog written"
        );

        // Pending slots pin volume 1 open, so unknown sizes go first when
        // rolling over.  Readers match complete records by id.
        let mut planned: Vec<_> = entries.into_iter().zip(slots).collect();
        if options.max_volume_size.is_some() {
            planned.sort_by_key(|(_, slot)| slot.is_none());
        }

        let mut body_start = catalog_pointer.offset;
        let mut content_bytes = 0;
        for (entry, slot) in planned {
            let full = options.max_volume_size.is_some_and(|max| writer.position() >= max);
            if full && writer.position() > body_start && writer.pending_slots() == 0 {
                RecordTag::VolumeBreak.write(&mut writer)?;
                write_tail(&mut writer, &HeaderSet::tail(HeaderType::VolumeEnd, None))?;
                volumes.push(writer.finish()?);
                volume_number += 1;
                writer = open_volume(&mut provider, &options, &archive_id, volume_number)?;
                body_start = writer.position();
            }

            match entry.content {
                None => write_complete_folder(&mut writer, entry.id)?,
                Some(content) => {
                    let size = content.size();
                    let mut source = content.open()?;
                    let copied =
                        write_complete_file(&mut writer, entry.id, &mut *source, size, slot, options.max_chunk_size)?;
                    debug!(id = entry.id, name = %entry.name, copied, "content written");
                    content_bytes += copied;
                }
            }
        }
        RecordTag::End.write(&mut writer)?;
        write_tail(&mut writer, &HeaderSet::tail(HeaderType::ArchiveEnd, Some(catalog_pointer)))?;
        volumes.push(writer.finish()?);

        info!(archive_id = %archive_id, volumes = volumes.len(), content_bytes, "archive written");
        Ok(WrittenArchive { archive_id, catalog_pointer, volumes, content_bytes })
    }
}

fn open_volume<P: WriterProvider>(
    provider:      &mut P,
    options:       &WriterOptions,
    archive_id:    &str,
    volume_number: u64,
) -> Result<RecordWriter<P::Sink>> {
    let sink = provider.volume(volume_number)?;
    let mut writer = RecordWriter::with_staging_limit(sink, options.staging_limit);
    let head = HeaderSet::head(HeaderType::head_for(volume_number), archive_id, volume_number)?;
    write_head(&mut writer, &head)?;
    debug!(volume_number, head_len = writer.position(), "volume started");
    Ok(writer)
}

fn write_head<W: Write>(writer: &mut W, head: &HeaderSet) -> io::Result<()> {
    let header_type = head.header_type().unwrap_or(HeaderType::ArchiveStart);
    writer.write_all(header_type.signature().as_bytes())?;
    write!(writer, "{head}")?;
    writer.write_all(&[SEPARATOR_BYTE])
}

fn write_tail<W: Write>(writer: &mut W, tail: &HeaderSet) -> io::Result<()> {
    let header_type = tail.header_type().unwrap_or(HeaderType::ArchiveEnd);
    writer.write_all(&[SEPARATOR_BYTE])?;
    write!(writer, "{tail}")?;
    writer.write_all(header_type.signature().as_bytes())
}

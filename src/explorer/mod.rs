//! Read side: catalog listing and content traversal.
//!
//! ```no_run
//! use b1pack::explorer::ArchiveExplorer;
//! use b1pack::volume::FsProvider;
//!
//! let mut explorer = ArchiveExplorer::open(FsProvider::new(&["backup.b1"])?)?;
//! for entry in explorer.entries() {
//!     println!("{}", explorer.path(entry).join("/"));
//! }
//! let data = explorer.read_file(1)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod volume_manager;

pub use volume_manager::{VolumeManager, VolumeStream, MAX_HEAD_SIZE, MAX_TAIL_SIZE};

use std::collections::HashMap;
use std::io::Read;

use tracing::{debug, info};

use crate::error::{PackError, Result};
use crate::header::{CatalogPointer, HeaderSet};
use crate::io_stream::ChunkedReader;
use crate::record::{read_catalog_record, read_complete_record, CatalogEntry, CompleteRecord};
use crate::volume::VolumeProvider;

/// Callbacks for [`ArchiveExplorer::visit`], in archive order.
pub trait ExplorerVisitor {
    fn visit_folder(&mut self, entry: &CatalogEntry) -> Result<()> {
        let _ = entry;
        Ok(())
    }

    /// `content` yields the file's bytes.  Whatever is left unread is
    /// skipped after the call returns.
    fn visit_file(&mut self, entry: &CatalogEntry, content: &mut dyn Read) -> Result<()>;
}

pub struct ArchiveExplorer<P: VolumeProvider> {
    manager:         VolumeManager<P>,
    header_set:      HeaderSet,
    catalog_pointer: CatalogPointer,
    entries:         Vec<CatalogEntry>,
    by_id:           HashMap<u64, usize>,
}

impl<P: VolumeProvider> ArchiveExplorer<P> {
    /// Validate volume 1, locate the catalog and read it.
    pub fn open(provider: P) -> Result<Self> {
        let mut manager = VolumeManager::new(provider);
        let header_set = manager.header_set()?;
        let catalog_pointer = header_set
            .catalog_pointer()
            .ok_or_else(|| PackError::NotFound("catalog pointer".into()))?;

        let mut stream = open_catalog(&mut manager, catalog_pointer)?;
        let mut entries = Vec::new();
        let mut by_id = HashMap::new();
        while let Some(entry) = read_catalog_record(&mut stream)? {
            if by_id.insert(entry.id, entries.len()).is_some() {
                return Err(PackError::InvalidRecord(format!("entry id {} listed twice", entry.id)));
            }
            entries.push(entry);
        }
        info!(
            archive_id = header_set.archive_id().unwrap_or_default(),
            entries = entries.len(),
            catalog = %catalog_pointer,
            "opened archive"
        );
        Ok(Self { manager, header_set, catalog_pointer, entries, by_id })
    }

    /// Head fields of volume 1, catalog pointer included.
    pub fn header_set(&self) -> &HeaderSet {
        &self.header_set
    }

    pub fn archive_id(&self) -> Option<&str> {
        self.header_set.archive_id()
    }

    pub fn catalog_pointer(&self) -> CatalogPointer {
        self.catalog_pointer
    }

    pub fn volume_count(&self) -> u64 {
        self.manager.provider().volume_count()
    }

    /// Catalog entries in catalog order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, id: u64) -> Option<&CatalogEntry> {
        self.by_id.get(&id).map(|&i| &self.entries[i])
    }

    /// Names from the top-level ancestor down to `entry`.
    pub fn path(&self, entry: &CatalogEntry) -> Vec<String> {
        let mut names = vec![entry.name.clone()];
        let mut parent = entry.parent_id;
        // A parent chain longer than the catalog is a cycle.
        while let Some(id) = parent {
            if names.len() > self.entries.len() {
                break;
            }
            match self.entry(id) {
                Some(p) => {
                    names.push(p.name.clone());
                    parent = p.parent_id;
                }
                None => break,
            }
        }
        names.reverse();
        names
    }

    /// Look up an entry by its `/`-separated path.
    pub fn find(&self, path: &str) -> Option<&CatalogEntry> {
        let wanted: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.entries.iter().find(|e| self.path(e) == wanted)
    }

    /// Walk the complete section, crossing volume breaks, and hand every
    /// record to `visitor`.  Each file body is checked against the catalog
    /// size.
    pub fn visit<V: ExplorerVisitor + ?Sized>(&mut self, visitor: &mut V) -> Result<()> {
        let mut volume_number = self.catalog_pointer.volume_number;
        let mut stream = open_catalog(&mut self.manager, self.catalog_pointer)?;
        while read_catalog_record(&mut stream)?.is_some() {}

        loop {
            match read_complete_record(&mut stream)? {
                CompleteRecord::End => break,
                CompleteRecord::VolumeBreak => {
                    volume_number += 1;
                    debug!(volume_number, "following volume break");
                    stream = self.manager.input_stream(volume_number)?;
                }
                CompleteRecord::Folder { id } => {
                    let entry = lookup(&self.entries, &self.by_id, id)?;
                    visitor.visit_folder(entry)?;
                }
                CompleteRecord::File { id } => {
                    let entry = lookup(&self.entries, &self.by_id, id)?;
                    let expected = entry
                        .size()
                        .ok_or_else(|| PackError::InvalidRecord(format!("content for folder entry {id}")))?;
                    let mut content = ChunkedReader::new(&mut stream);
                    visitor.visit_file(entry, &mut content)?;
                    let actual = content.drain()?;
                    if actual != expected {
                        return Err(PackError::SizeMismatch { expected, actual });
                    }
                }
            }
        }
        Ok(())
    }

    /// Content of one file.
    pub fn read_file(&mut self, id: u64) -> Result<Vec<u8>> {
        match self.entry(id) {
            Some(entry) if entry.is_file() => {}
            Some(_) => return Err(PackError::InvalidEntry(format!("entry {id} is a folder"))),
            None => return Err(PackError::NotFound(format!("entry {id}"))),
        }
        let mut grab = Grab { id, data: None };
        self.visit(&mut grab)?;
        grab.data.ok_or_else(|| PackError::NotFound(format!("content of entry {id}")))
    }
}

fn open_catalog<P: VolumeProvider>(manager: &mut VolumeManager<P>, pointer: CatalogPointer) -> Result<VolumeStream> {
    let mut stream = manager.input_stream(pointer.volume_number)?;
    let skip = pointer
        .offset
        .checked_sub(stream.count())
        .ok_or_else(|| PackError::InvalidRecord(format!("catalog pointer {pointer} points into a volume head")))?;
    stream.skip_exact(skip)?;
    Ok(stream)
}

fn lookup<'a>(entries: &'a [CatalogEntry], by_id: &HashMap<u64, usize>, id: u64) -> Result<&'a CatalogEntry> {
    by_id
        .get(&id)
        .map(|&i| &entries[i])
        .ok_or_else(|| PackError::InvalidRecord(format!("content for entry {id} missing from the catalog")))
}

struct Grab {
    id:   u64,
    data: Option<Vec<u8>>,
}

impl ExplorerVisitor for Grab {
    fn visit_file(&mut self, entry: &CatalogEntry, content: &mut dyn Read) -> Result<()> {
        if entry.id == self.id {
            let mut data = Vec::new();
            content.read_to_end(&mut data)?;
            self.data = Some(data);
        }
        Ok(())
    }
}

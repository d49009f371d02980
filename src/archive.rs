//! Filesystem [`Archive`] API, the primary embedding surface.
//!
//! ```no_run
//! use b1pack::archive::{add_path, Archive};
//! use b1pack::writer::{Content, WriterOptions};
//!
//! // Write
//! let mut writer = Archive::create("out/backup", WriterOptions::default());
//! writer.add_file(None, "readme.txt", None, Content::from_bytes(b"Hello, world!"))?;
//! add_path(&mut writer, None, "docs".as_ref())?;
//! writer.finish()?;
//!
//! // Read
//! let mut ar = Archive::open("out/backup.b1")?;
//! let data = ar.read_file("readme.txt")?;
//! assert_eq!(data, b"Hello, world!");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{PackError, Result};
use crate::explorer::{ArchiveExplorer, ExplorerVisitor};
use crate::io_stream::SeekableSink;
use crate::record::{CatalogEntry, EntryKind};
use crate::volume::{parse_part_name, volume_file_name, FsProvider};
use crate::writer::{ArchiveWriter, Content, WriterOptions, WriterProvider};

// ── Volume files ─────────────────────────────────────────────────────────────

/// Creates `<base>.b1`, or `<base>.partN.b1` when the archive may span
/// several volumes.
#[derive(Debug, Clone)]
pub struct FsWriterProvider {
    dir:          PathBuf,
    base:         String,
    multi_volume: bool,
}

impl FsWriterProvider {
    /// `output` is the archive path with or without the `.b1` extension.
    pub fn new<P: AsRef<Path>>(output: P, multi_volume: bool) -> Self {
        let output = output.as_ref();
        let dir = output.parent().map(Path::to_owned).unwrap_or_default();
        let file_name = output.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let base = file_name.strip_suffix(".b1").unwrap_or(&file_name).to_owned();
        Self { dir, base, multi_volume }
    }

    pub fn path_for(&self, volume_number: u64) -> PathBuf {
        self.dir.join(volume_file_name(&self.base, volume_number, self.multi_volume))
    }
}

impl WriterProvider for FsWriterProvider {
    type Sink = SeekableSink<BufWriter<File>>;

    fn volume(&mut self, volume_number: u64) -> io::Result<Self::Sink> {
        let path = self.path_for(volume_number);
        debug!(path = %path.display(), "creating volume file");
        SeekableSink::new(BufWriter::new(File::create(path)?))
    }
}

/// Every volume of the archive `path` belongs to, in order.
///
/// For `<base>.partN.b1` this is `part1` upward until the first missing
/// number; any other path is a single-volume archive.
pub fn discover_volumes<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let part = path.file_name().and_then(|n| n.to_str()).and_then(parse_part_name);
    let Some((base, _)) = part else {
        return Ok(vec![path.to_owned()]);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut volumes = Vec::new();
    for number in 1.. {
        let candidate = dir.join(volume_file_name(base, number, true));
        if !candidate.is_file() {
            break;
        }
        volumes.push(candidate);
    }
    if volumes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {} found", dir.join(volume_file_name(base, 1, true)).display()),
        ));
    }
    Ok(volumes)
}

/// Register `path` under `parent`, recursing into directories in name order.
/// File content is opened only when the writer copies it.
pub fn add_path<P: WriterProvider>(writer: &mut ArchiveWriter<'_, P>, parent: Option<u64>, path: &Path) -> Result<u64> {
    let path = match path.file_name() {
        Some(_) => path.to_owned(),
        None => path.canonicalize()?,
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackError::InvalidEntry(format!("no usable name for {}", path.display())))?
        .to_owned();
    let meta = fs::metadata(&path)?;
    let last_modified = meta.modified().ok().map(|t| DateTime::<Utc>::from(t).timestamp_millis());

    if meta.is_dir() {
        let id = writer.add_folder(parent, &name, last_modified)?;
        let mut children = fs::read_dir(&path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        children.sort();
        for child in &children {
            add_path(writer, Some(id), child)?;
        }
        Ok(id)
    } else {
        let content = Content::deferred(Some(meta.len()), move || File::open(path));
        writer.add_file(parent, &name, last_modified, content)
    }
}

// ── FileInfo ─────────────────────────────────────────────────────────────────

/// Lightweight descriptor returned by [`Archive::list`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id:            u64,
    pub path:          String,
    #[serde(flatten)]
    pub kind:          EntryKind,
    pub last_modified: Option<i64>,
}

impl FileInfo {
    pub fn modified_utc(&self) -> Option<DateTime<Utc>> {
        self.last_modified.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

// ── Archive ──────────────────────────────────────────────────────────────────

pub struct Archive {
    volumes:  Vec<PathBuf>,
    explorer: ArchiveExplorer<FsProvider>,
}

impl Archive {
    /// Open the archive any of its volume files belongs to.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let volumes = discover_volumes(path)?;
        let explorer = ArchiveExplorer::open(FsProvider::new(&volumes)?)?;
        Ok(Self { volumes, explorer })
    }

    /// Writer producing `<output>.b1`, or numbered parts when
    /// `options.max_volume_size` is set.
    pub fn create<'a, P: AsRef<Path>>(output: P, options: WriterOptions) -> ArchiveWriter<'a, FsWriterProvider> {
        let provider = FsWriterProvider::new(output, options.max_volume_size.is_some());
        ArchiveWriter::new(provider, options)
    }

    pub fn volume_paths(&self) -> &[PathBuf] {
        &self.volumes
    }

    pub fn explorer(&self) -> &ArchiveExplorer<FsProvider> {
        &self.explorer
    }

    pub fn explorer_mut(&mut self) -> &mut ArchiveExplorer<FsProvider> {
        &mut self.explorer
    }

    pub fn list(&self) -> Vec<FileInfo> {
        self.explorer
            .entries()
            .iter()
            .map(|e| FileInfo {
                id:            e.id,
                path:          self.explorer.path(e).join("/"),
                kind:          e.kind,
                last_modified: e.last_modified,
            })
            .collect()
    }

    pub fn stat(&self, path: &str) -> Option<&CatalogEntry> {
        self.explorer.find(path)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self
            .stat(path)
            .ok_or_else(|| PackError::NotFound(format!("entry {path}")))?
            .id;
        self.explorer.read_file(id)
    }

    /// Extract every entry into `dest`, creating it if necessary.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let mut targets = HashMap::new();
        for entry in self.explorer.entries() {
            let mut target = dest.to_owned();
            for name in self.explorer.path(entry) {
                if !is_plain_name(&name) {
                    return Err(PackError::InvalidRecord(format!("entry {} has unsafe name {name:?}", entry.id)));
                }
                target.push(name);
            }
            targets.insert(entry.id, target);
        }
        self.explorer.visit(&mut Extractor { targets })
    }
}

/// One normal path component, nothing that climbs or roots.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none() && !name.contains(['/', '\\'])
}

struct Extractor {
    targets: HashMap<u64, PathBuf>,
}

impl Extractor {
    fn target(&self, entry: &CatalogEntry) -> Result<&Path> {
        self.targets
            .get(&entry.id)
            .map(PathBuf::as_path)
            .ok_or_else(|| PackError::NotFound(format!("entry {}", entry.id)))
    }
}

impl ExplorerVisitor for Extractor {
    fn visit_folder(&mut self, entry: &CatalogEntry) -> Result<()> {
        fs::create_dir_all(self.target(entry)?)?;
        Ok(())
    }

    fn visit_file(&mut self, entry: &CatalogEntry, content: &mut dyn Read) -> Result<()> {
        let target = self.target(entry)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = BufWriter::new(File::create(target)?);
        io::copy(content, &mut file)?;
        file.flush()?;
        debug!(path = %target.display(), "extracted");
        Ok(())
    }
}

//! Read-side volume sources.
//!
//! A [`VolumeProvider`] hands out volumes by 1-based number and knows how
//! many there are.  It answers `None` for numbers it does not hold; the
//! explorer turns that into [`PackError::NotFound`](crate::PackError::NotFound).

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One physical unit of an archive.
pub trait Volume {
    /// Diagnostic name, reported in corruption errors.
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    /// A fresh stream positioned at the first byte of the volume.
    fn open(&self) -> io::Result<Box<dyn Read>>;
}

pub trait VolumeProvider {
    type Volume: Volume;

    fn volume(&self, number: u64) -> Option<Self::Volume>;
    fn volume_count(&self) -> u64;
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryVolume {
    name:  String,
    bytes: Arc<[u8]>,
}

impl MemoryVolume {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { name: name.into(), bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Volume for MemoryVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn open(&self) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }
}

/// Volumes held in memory, numbered in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    volumes: Vec<MemoryVolume>,
}

impl MemoryProvider {
    pub fn new(volumes: Vec<MemoryVolume>) -> Self {
        Self { volumes }
    }

    /// Name volumes `<base>.b1` or `<base>.partN.b1` like the filesystem layout.
    pub fn from_bytes(base: &str, volumes: Vec<Vec<u8>>) -> Self {
        let multi_volume = volumes.len() > 1;
        let volumes = volumes
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| MemoryVolume::new(volume_file_name(base, i as u64 + 1, multi_volume), bytes))
            .collect();
        Self { volumes }
    }
}

impl VolumeProvider for MemoryProvider {
    type Volume = MemoryVolume;

    fn volume(&self, number: u64) -> Option<MemoryVolume> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.volumes.get(index).cloned()
    }

    fn volume_count(&self) -> u64 {
        self.volumes.len() as u64
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FsVolume {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FsVolume {
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let size = std::fs::metadata(&path)?.len();
        let name = path.display().to_string();
        Ok(Self { path, name, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Volume for FsVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn open(&self) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// Volume files given in order; sizes are taken when the provider is built.
#[derive(Debug, Clone)]
pub struct FsProvider {
    volumes: Vec<FsVolume>,
}

impl FsProvider {
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let volumes = paths.iter().map(FsVolume::open_path).collect::<io::Result<Vec<_>>>()?;
        Ok(Self { volumes })
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.volumes.iter().map(|v| v.path())
    }
}

impl VolumeProvider for FsProvider {
    type Volume = FsVolume;

    fn volume(&self, number: u64) -> Option<FsVolume> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.volumes.get(index).cloned()
    }

    fn volume_count(&self) -> u64 {
        self.volumes.len() as u64
    }
}

/// `<base>.b1` for a single-volume archive, `<base>.partN.b1` otherwise.
pub fn volume_file_name(base: &str, number: u64, multi_volume: bool) -> String {
    if multi_volume {
        format!("{base}.part{number}.b1")
    } else {
        format!("{base}.b1")
    }
}

/// Split `<base>.partN.b1` into its base and volume number.
pub fn parse_part_name(file_name: &str) -> Option<(&str, u64)> {
    let stem = file_name.strip_suffix(".b1")?;
    let (base, number) = stem.rsplit_once(".part")?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number = number.parse().ok().filter(|&n| n > 0)?;
    Some((base, number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_is_one_based() {
        let provider = MemoryProvider::from_bytes("pack", vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(provider.volume_count(), 2);
        assert!(provider.volume(0).is_none());
        assert!(provider.volume(3).is_none());
        let second = provider.volume(2).unwrap();
        assert_eq!(second.name(), "pack.part2.b1");
        assert_eq!(second.size(), 3);
        let mut content = Vec::new();
        second.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"two");
    }

    #[test]
    fn single_volume_name_has_no_part_suffix() {
        assert_eq!(volume_file_name("pack", 1, false), "pack.b1");
        assert_eq!(volume_file_name("pack", 1, true), "pack.part1.b1");
    }

    #[test]
    fn part_names_parse() {
        assert_eq!(parse_part_name("home.backup.part12.b1"), Some(("home.backup", 12)));
        assert_eq!(parse_part_name("pack.b1"), None);
        assert_eq!(parse_part_name("pack.part0.b1"), None);
        assert_eq!(parse_part_name("pack.part+1.b1"), None);
        assert_eq!(parse_part_name("pack.part3.zip"), None);
    }

    #[test]
    fn fs_provider_reads_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.b1");
        std::fs::write(&path, b"12345").unwrap();
        let provider = FsProvider::new(&[&path]).unwrap();
        let volume = provider.volume(1).unwrap();
        assert_eq!(volume.size(), 5);
        assert_eq!(volume.path(), path.as_path());
    }
}

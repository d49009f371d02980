use std::io::{self, BufReader, Read};

use byteorder::ReadBytesExt;
use tracing::{debug, warn};

use crate::error::{PackError, Result};
use crate::header::{
    HeaderSet, HeaderType, B1_AE, B1_AS, B1_VE, B1_VS, SCHEMA_VERSION, SEPARATOR_BYTE, SIGNATURE_LEN,
};
use crate::io_stream::CountingReader;
use crate::volume::{Volume, VolumeProvider};

/// Only this many trailing bytes are searched for the tail.
pub const MAX_TAIL_SIZE: u64 = 1024;

/// A head, signature included, must end within this many bytes.
pub const MAX_HEAD_SIZE: usize = 1024;

/// A volume stream positioned by how much has been consumed from it.
pub type VolumeStream = CountingReader<BufReader<Box<dyn Read>>>;

/// Opens and cross-checks volumes, and locates the catalog.
///
/// The first volume opened fixes the archive id every later volume must
/// carry.
pub struct VolumeManager<P: VolumeProvider> {
    provider:   P,
    archive_id: Option<String>,
}

impl<P: VolumeProvider> VolumeManager<P> {
    pub fn new(provider: P) -> Self {
        Self { provider, archive_id: None }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Reference id, once a volume has been opened.
    pub fn archive_id(&self) -> Option<&str> {
        self.archive_id.as_deref()
    }

    /// Head fields of volume 1 with the catalog pointer filled in.
    ///
    /// The pointer comes from volume 1 (head, then tail) or, failing that,
    /// from the tail of the last volume.
    pub fn header_set(&mut self) -> Result<HeaderSet> {
        let mut header_set = self.volume_header_set(1)?;
        if header_set.catalog_pointer().is_some() {
            return Ok(header_set);
        }

        let last = self.provider.volume_count();
        if last > 1 {
            if let Some(pointer) = self.volume_header_set(last)?.catalog_pointer() {
                header_set.set_catalog_pointer(pointer);
                return Ok(header_set);
            }
        }
        let name = self
            .provider
            .volume(last.max(1))
            .map(|v| v.name().to_owned())
            .unwrap_or_default();
        Err(PackError::NotFound(format!("catalog pointer in {name}")))
    }

    /// Validated stream over volume `volume_number`, positioned right after
    /// its head.
    pub fn input_stream(&mut self, volume_number: u64) -> Result<VolumeStream> {
        let volume = self.volume(volume_number)?;
        let (_, stream) = self.open_volume(&volume, volume_number)?;
        Ok(stream)
    }

    fn volume(&self, volume_number: u64) -> Result<P::Volume> {
        self.provider
            .volume(volume_number)
            .ok_or_else(|| PackError::NotFound(format!("volume {volume_number}")))
    }

    /// Head fields, completed with the tail's catalog pointer when the head
    /// carries none.
    fn volume_header_set(&mut self, volume_number: u64) -> Result<HeaderSet> {
        let volume = self.volume(volume_number)?;
        let (mut header_set, mut stream) = self.open_volume(&volume, volume_number)?;
        if header_set.catalog_pointer().is_none() {
            let tail = read_tail(&volume, &mut stream)?;
            if let Some(pointer) = tail.catalog_pointer() {
                header_set.set_catalog_pointer(pointer);
            }
        }
        Ok(header_set)
    }

    fn open_volume(&mut self, volume: &P::Volume, volume_number: u64) -> Result<(HeaderSet, VolumeStream)> {
        debug!(volume = volume.name(), volume_number, "opening volume");
        let mut stream = CountingReader::new(BufReader::new(volume.open()?));
        let header_set = read_head(volume, &mut stream)?;
        self.validate(volume, &header_set, volume_number)?;
        Ok((header_set, stream))
    }

    /// Checked in order: type, schema version, archive id, volume number.
    fn validate<V: Volume + ?Sized>(&mut self, volume: &V, header_set: &HeaderSet, volume_number: u64) -> Result<()> {
        if self.archive_id.is_none() {
            self.archive_id = header_set.archive_id().map(str::to_owned);
        }

        let expected = HeaderType::head_for(volume_number);
        if header_set.header_type() != Some(expected) {
            return Err(PackError::corrupt(
                volume.name(),
                format!("expected header type {expected}, found {}", display_or_none(header_set.header_type())),
            ));
        }

        match header_set.schema_version() {
            Some(version) if version <= SCHEMA_VERSION => {}
            found => {
                return Err(PackError::corrupt(
                    volume.name(),
                    format!("unsupported schema version {}, at most {SCHEMA_VERSION}", display_or_none(found)),
                ))
            }
        }

        let archive_id = header_set.archive_id();
        if archive_id.is_none() || archive_id != self.archive_id.as_deref() {
            return Err(PackError::corrupt(
                volume.name(),
                format!(
                    "expected archive id {}, found {}",
                    display_or_none(self.archive_id.as_deref()),
                    display_or_none(archive_id)
                ),
            ));
        }

        if header_set.volume_number() != Some(volume_number) {
            return Err(PackError::corrupt(
                volume.name(),
                format!(
                    "expected volume number {volume_number}, found {}",
                    display_or_none(header_set.volume_number())
                ),
            ));
        }
        Ok(())
    }
}

// ── Framing ──────────────────────────────────────────────────────────────────

/// Read `SIGNATURE fields SEP` from the start of `stream`.
fn read_head<V: Volume + ?Sized, R: Read>(volume: &V, stream: &mut R) -> Result<HeaderSet> {
    let mut buffer = Vec::new();
    loop {
        let byte = stream.read_u8().map_err(|e| eof_as_corrupt(volume, e, "volume ends inside its head"))?;
        if byte == SEPARATOR_BYTE {
            break;
        }
        if buffer.len() == MAX_HEAD_SIZE {
            return Err(PackError::corrupt(volume.name(), format!("head exceeds {MAX_HEAD_SIZE} bytes")));
        }
        buffer.push(byte);
        if buffer.len() == SIGNATURE_LEN && buffer != B1_AS.as_bytes() && buffer != B1_VS.as_bytes() {
            return Err(PackError::corrupt(volume.name(), "missing head signature"));
        }
    }
    if buffer.len() <= SIGNATURE_LEN {
        return Err(PackError::corrupt(volume.name(), "head has no fields"));
    }

    let (signature, fields) = buffer.split_at(SIGNATURE_LEN);
    let header_set = parse_fields(volume, fields)?;
    check_signature(volume, signature, &header_set)?;
    Ok(header_set)
}

/// Read `SEP fields SIGNATURE` from the last [`MAX_TAIL_SIZE`] bytes of the
/// volume.  `stream` is consumed to its end.
fn read_tail<V: Volume + ?Sized, R: Read>(volume: &V, stream: &mut CountingReader<R>) -> Result<HeaderSet> {
    let available = volume
        .size()
        .checked_sub(stream.count())
        .ok_or_else(|| PackError::corrupt(volume.name(), "volume is shorter than its head"))?;
    let capacity = available.min(MAX_TAIL_SIZE);
    stream
        .skip_exact(available - capacity)
        .map_err(|e| eof_as_corrupt(volume, e, "volume is shorter than its reported size"))?;

    let mut buffer = Vec::with_capacity(capacity as usize);
    (&mut *stream).take(capacity).read_to_end(&mut buffer)?;
    if (buffer.len() as u64) < capacity {
        return Err(PackError::corrupt(volume.name(), "volume is shorter than its reported size"));
    }

    let start = buffer
        .iter()
        .rposition(|&b| b == SEPARATOR_BYTE)
        .map(|i| i + 1)
        .ok_or_else(|| PackError::corrupt(volume.name(), "no tail separator"))?;
    let tail = &buffer[start..];
    if tail.len() < SIGNATURE_LEN
        || !(tail.ends_with(B1_AE.as_bytes()) || tail.ends_with(B1_VE.as_bytes()))
    {
        return Err(PackError::corrupt(volume.name(), "missing tail signature"));
    }

    let (fields, signature) = tail.split_at(tail.len() - SIGNATURE_LEN);
    let header_set = parse_fields(volume, fields)?;
    check_signature(volume, signature, &header_set)?;
    Ok(header_set)
}

fn parse_fields<V: Volume + ?Sized>(volume: &V, fields: &[u8]) -> Result<HeaderSet> {
    let text = std::str::from_utf8(fields)
        .map_err(|_| PackError::corrupt(volume.name(), "header is not valid text"))?;
    text.parse()
        .map_err(|e| PackError::corrupt(volume.name(), format!("unreadable header: {e}")))
}

/// The signature and the `type` field must name the same role.
fn check_signature<V: Volume + ?Sized>(volume: &V, signature: &[u8], header_set: &HeaderSet) -> Result<()> {
    let framed = std::str::from_utf8(signature)
        .ok()
        .and_then(HeaderType::from_signature)
        .ok_or_else(|| PackError::corrupt(volume.name(), "unknown signature"))?;
    match header_set.header_type() {
        Some(declared) if declared != framed => Err(PackError::corrupt(
            volume.name(),
            format!("{} signature around a header of type {declared}", framed.signature()),
        )),
        Some(_) => Ok(()),
        None => {
            warn!(volume = volume.name(), signature = framed.signature(), "header has no type field");
            Ok(())
        }
    }
}

fn eof_as_corrupt<V: Volume + ?Sized>(volume: &V, err: io::Error, reason: &str) -> PackError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => PackError::corrupt(volume.name(), reason),
        _ => PackError::Io(err),
    }
}

fn display_or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_owned(), |v| v.to_string())
}

use std::collections::BTreeSet;
use std::io::{self, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{PackError, Result};
use crate::number::{encode_padded, write_padded, MAX_LONG_SIZE};

/// Staged bytes are pushed to the sink once this much has accumulated.
pub const DEFAULT_STAGING_LIMIT: usize = 1024 * 1024;

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Destination of one volume's bytes.
///
/// A sink that can rewrite already-written bytes lets [`RecordWriter`] hand
/// over placeholders immediately; any other sink forces the writer to keep
/// them staged until they are resolved.
pub trait VolumeSink: Write {
    fn can_rewrite(&self) -> bool {
        false
    }

    /// Overwrite `bytes` at `position`, counted from the first byte this sink
    /// received.  The write position is left unchanged.
    fn rewrite(&mut self, position: u64, bytes: &[u8]) -> io::Result<()> {
        let _ = (position, bytes);
        Err(io::Error::new(io::ErrorKind::Unsupported, "volume sink cannot rewrite written bytes"))
    }
}

/// Append-only sink: pipes, sockets, stdout.
pub struct StreamSink<W: Write>(W);

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self(inner)
    }

    pub fn get_ref(&self) -> &W {
        &self.0
    }

    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> VolumeSink for StreamSink<W> {}

/// Sink over a seekable writer; rewrites seek back and restore the position.
pub struct SeekableSink<W: Write + Seek> {
    inner: W,
    base:  u64,
}

impl<W: Write + Seek> SeekableSink<W> {
    /// Volume offsets are counted from the writer's current position.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self { inner, base })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> VolumeSink for SeekableSink<W> {
    fn can_rewrite(&self) -> bool {
        true
    }

    fn rewrite(&mut self, position: u64, bytes: &[u8]) -> io::Result<()> {
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.base + position))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

impl VolumeSink for Vec<u8> {
    fn can_rewrite(&self) -> bool {
        true
    }

    fn rewrite(&mut self, position: u64, bytes: &[u8]) -> io::Result<()> {
        let start = position as usize;
        let end = start + bytes.len();
        if end > self.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "rewrite past end of buffer"));
        }
        self[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

// ── DeferredSlot ──────────────────────────────────────────────────────────────

/// A reserved, fixed-width integer field whose value is not known yet.
///
/// The handle is not clonable and [`RecordWriter::resolve`] consumes it, so
/// every slot is resolved at most once.
#[derive(Debug)]
#[must_use = "a deferred slot must be resolved before the volume is finished"]
pub struct DeferredSlot {
    position: u64,
    width:    usize,
}

impl DeferredSlot {
    /// Volume offset of the first placeholder byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

// ── RecordWriter ──────────────────────────────────────────────────────────────

/// Write-ahead staging in front of a [`VolumeSink`].
///
/// Bytes from the earliest unresolved slot onward never reach a
/// non-rewritable sink before the slot is resolved.
pub struct RecordWriter<S: VolumeSink> {
    sink:          S,
    staged:        Vec<u8>,
    /// Bytes already handed to the sink.
    flushed:       u64,
    /// Positions of unresolved slots.
    pending:       BTreeSet<u64>,
    staging_limit: usize,
}

impl<S: VolumeSink> RecordWriter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_staging_limit(sink, DEFAULT_STAGING_LIMIT)
    }

    pub fn with_staging_limit(sink: S, staging_limit: usize) -> Self {
        Self {
            sink,
            staged: Vec::new(),
            flushed: 0,
            pending: BTreeSet::new(),
            staging_limit: staging_limit.max(1),
        }
    }

    /// Volume offset of the next byte written.
    pub fn position(&self) -> u64 {
        self.flushed + self.staged.len() as u64
    }

    pub fn pending_slots(&self) -> usize {
        self.pending.len()
    }

    /// Bytes held back from the sink.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Reserve a slot wide enough for any `u64`.
    pub fn reserve_long(&mut self) -> Result<DeferredSlot> {
        self.reserve(MAX_LONG_SIZE)
    }

    pub fn reserve(&mut self, width: usize) -> Result<DeferredSlot> {
        let position = self.position();
        write_padded(&mut self.staged, 0, width)?;
        self.pending.insert(position);
        self.relieve()?;
        Ok(DeferredSlot { position, width })
    }

    /// Write the final value into a reserved slot.
    pub fn resolve(&mut self, slot: DeferredSlot, value: u64) -> Result<()> {
        let bytes = encode_padded(value, slot.width)?;
        let bytes = &bytes[..slot.width];
        if slot.position >= self.flushed {
            let start = (slot.position - self.flushed) as usize;
            self.staged[start..start + slot.width].copy_from_slice(bytes);
        } else {
            self.sink.rewrite(slot.position, bytes).map_err(|e| match e.kind() {
                io::ErrorKind::Unsupported => PackError::InvalidState(format!(
                    "slot at offset {} already left a non-rewritable sink",
                    slot.position
                )),
                _ => PackError::Io(e),
            })?;
        }
        self.pending.remove(&slot.position);
        debug!(position = slot.position, value, "resolved deferred slot");
        self.relieve()?;
        Ok(())
    }

    /// Push every staged byte to the sink and return it.  Fails if a slot is
    /// still unresolved.
    pub fn finish(mut self) -> Result<S> {
        if let Some(position) = self.pending.first() {
            return Err(PackError::InvalidState(format!(
                "{} deferred slot(s) unresolved, first at offset {position}",
                self.pending.len()
            )));
        }
        self.push_out()?;
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn relieve(&mut self) -> io::Result<()> {
        if self.staged.len() >= self.staging_limit {
            self.push_out()?;
        }
        Ok(())
    }

    fn push_out(&mut self) -> io::Result<()> {
        let cut = match self.pending.first() {
            Some(&position) if !self.sink.can_rewrite() => (position - self.flushed) as usize,
            _ => self.staged.len(),
        };
        if cut == 0 {
            return Ok(());
        }
        self.sink.write_all(&self.staged[..cut])?;
        self.staged.drain(..cut);
        self.flushed += cut as u64;
        Ok(())
    }
}

impl<S: VolumeSink> Write for RecordWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.staged.extend_from_slice(buf);
        self.relieve()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.push_out()?;
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::read_u64;
    use std::io::Cursor;

    #[test]
    fn slot_patched_while_staged_never_reaches_stream_as_placeholder() {
        let mut writer = RecordWriter::with_staging_limit(StreamSink::new(Vec::new()), 4);
        writer.write_all(b"ab").unwrap();
        let slot = writer.reserve_long().unwrap();
        writer.write_all(b"0123456789").unwrap();
        // "ab" left, the slot and everything after it stayed.
        assert_eq!(writer.staged_len(), MAX_LONG_SIZE + 10);
        writer.resolve(slot, 13).unwrap();
        let out = writer.finish().unwrap().into_inner();
        assert_eq!(&out[..2], b"ab");
        assert_eq!(read_u64(&mut Cursor::new(&out[2..])).unwrap(), 13);
        assert_eq!(&out[2 + MAX_LONG_SIZE..], b"0123456789");
    }

    #[test]
    fn rewritable_sink_is_patched_in_place() {
        let mut writer = RecordWriter::with_staging_limit(Vec::new(), 1);
        let slot = writer.reserve_long().unwrap();
        writer.write_all(b"tail").unwrap();
        assert_eq!(writer.staged_len(), 0);
        writer.resolve(slot, 300).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out.len(), MAX_LONG_SIZE + 4);
        assert_eq!(read_u64(&mut Cursor::new(&out)).unwrap(), 300);
    }

    #[test]
    fn seekable_sink_rewrites_and_restores_position() {
        let mut writer = RecordWriter::with_staging_limit(SeekableSink::new(Cursor::new(Vec::new())).unwrap(), 1);
        writer.write_all(b"x").unwrap();
        let slot = writer.reserve_long().unwrap();
        writer.write_all(b"yz").unwrap();
        writer.resolve(slot, u64::MAX).unwrap();
        writer.write_all(b"!").unwrap();
        let out = writer.finish().unwrap().into_inner().into_inner();
        assert_eq!(out[0], b'x');
        assert_eq!(read_u64(&mut Cursor::new(&out[1..])).unwrap(), u64::MAX);
        assert_eq!(&out[1 + MAX_LONG_SIZE..], b"yz!");
    }

    #[test]
    fn finish_with_unresolved_slot_fails() {
        let mut writer = RecordWriter::new(StreamSink::new(Vec::new()));
        let _slot = writer.reserve_long().unwrap();
        assert!(matches!(writer.finish(), Err(PackError::InvalidState(_))));
    }

    #[test]
    fn position_counts_flushed_and_staged() {
        let mut writer = RecordWriter::with_staging_limit(StreamSink::new(Vec::new()), 3);
        writer.write_all(b"abcde").unwrap();
        assert_eq!(writer.staged_len(), 0);
        writer.write_all(b"f").unwrap();
        assert_eq!(writer.position(), 6);
        writer.flush().unwrap();
        assert_eq!(writer.finish().unwrap().into_inner(), b"abcdef");
    }
}

//! Byte-stream plumbing shared by the writer and the explorer.
//!
//! # Counting
//! [`CountingReader`] tracks how many bytes were pulled from a volume so the
//! tail reader knows how much of the volume is left, and catalog pointers can
//! be resolved against absolute volume offsets.
//!
//! # Content framing
//! [`ChunkedWriter`] / [`ChunkedReader`] implement the `[len][bytes]...[0]`
//! content body.  Known-size content is the degenerate single-chunk case.
//!
//! # Staging
//! [`RecordWriter`] owns a volume sink and keeps every byte written after the
//! earliest unresolved [`DeferredSlot`] in memory, so placeholders can be
//! patched without the sink ever seeing the placeholder bytes.

mod chunked;
mod staging;

pub use chunked::{ChunkedReader, ChunkedWriter, DEFAULT_MAX_CHUNK_SIZE};
pub use staging::{DeferredSlot, RecordWriter, SeekableSink, StreamSink, VolumeSink, DEFAULT_STAGING_LIMIT};

use std::io::{self, Read};

/// Reader that counts consumed bytes.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes consumed since the start of the underlying stream.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Discard exactly `n` bytes.
    pub fn skip_exact(&mut self, n: u64) -> io::Result<()> {
        let skipped = io::copy(&mut self.by_ref().take(n), &mut io::sink())?;
        if skipped < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after skipping {skipped} of {n} bytes"),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn counts_reads_and_skips() {
        let mut reader = CountingReader::new(Cursor::new(b"0123456789".to_vec()));
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.count(), 3);
        reader.skip_exact(4).unwrap();
        assert_eq!(reader.count(), 7);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");
        assert_eq!(reader.count(), 10);
    }

    #[test]
    fn skip_past_end_fails() {
        let mut reader = CountingReader::new(Cursor::new(vec![1u8, 2]));
        let err = reader.skip_exact(5).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

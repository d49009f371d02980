use std::io::{self, Read, Write};

use crate::number::{read_u64, write_u64};

/// Default maximum chunk payload: 64 KiB.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024;

// ── Writer ───────────────────────────────────────────────────────────────────

/// Frames everything written to it as `[len][bytes]` chunks of at most
/// `max_chunk_size` bytes.  [`finish`](Self::finish) emits the zero-length
/// terminator and reports the total payload size.
///
/// A chunk is only emitted once it is full or the writer is finished, so the
/// framing is independent of how the caller slices its writes.
pub struct ChunkedWriter<W: Write> {
    inner:          W,
    buffer:         Vec<u8>,
    max_chunk_size: usize,
    total:          u64,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W, max_chunk_size: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1);
        Self {
            inner,
            buffer: Vec::with_capacity(max_chunk_size.min(DEFAULT_MAX_CHUNK_SIZE)),
            max_chunk_size,
            total: 0,
        }
    }

    /// Payload bytes accepted so far.
    pub fn total(&self) -> u64 {
        self.total + self.buffer.len() as u64
    }

    /// Flush the pending partial chunk, write the terminator, and return the
    /// total payload size.
    pub fn finish(mut self) -> io::Result<u64> {
        if !self.buffer.is_empty() {
            self.emit_buffer()?;
        }
        write_u64(&mut self.inner, 0)?;
        Ok(self.total)
    }

    fn emit_buffer(&mut self) -> io::Result<()> {
        write_u64(&mut self.inner, self.buffer.len() as u64)?;
        self.inner.write_all(&self.buffer)?;
        self.total += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Full chunks skip the buffer entirely.
        if self.buffer.is_empty() && buf.len() >= self.max_chunk_size {
            let chunk = &buf[..self.max_chunk_size];
            write_u64(&mut self.inner, chunk.len() as u64)?;
            self.inner.write_all(chunk)?;
            self.total += chunk.len() as u64;
            return Ok(chunk.len());
        }
        let room = self.max_chunk_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.max_chunk_size {
            self.emit_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Reassembles a content body written either as a single sized chunk or as
/// a chunk sequence.  Reports end-of-stream at the zero-length terminator.
pub struct ChunkedReader<R: Read> {
    inner:     R,
    remaining: u64,
    total:     u64,
    finished:  bool,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, remaining: 0, total: 0, finished: false }
    }

    /// Payload bytes delivered so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Skip whatever is left of the body, including the terminator, and
    /// return the total payload size.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())?;
        Ok(self.total)
    }
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.remaining == 0 {
            if self.finished {
                return Ok(0);
            }
            let len = read_u64(&mut self.inner)?;
            if len == 0 {
                self.finished = true;
                return Ok(0);
            }
            self.remaining = len;
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("content chunk truncated with {} bytes outstanding", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        self.total += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(data: &[u8], max: usize) -> (Vec<u8>, u64) {
        let mut out = Vec::new();
        let mut writer = ChunkedWriter::new(&mut out, max);
        writer.write_all(data).unwrap();
        let total = writer.finish().unwrap();
        (out, total)
    }

    fn unframe(bytes: &[u8]) -> Vec<u8> {
        let mut reader = ChunkedReader::new(Cursor::new(bytes));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.total(), out.len() as u64);
        out
    }

    #[test]
    fn hello_world_in_five_byte_chunks() {
        let (bytes, total) = frame(b"Hello, World!", 5);
        assert_eq!(total, 13);
        let mut expected = vec![5u8];
        expected.extend_from_slice(b"Hello");
        expected.push(5);
        expected.extend_from_slice(b", Wor");
        expected.push(3);
        expected.extend_from_slice(b"ld!");
        expected.push(0);
        assert_eq!(bytes, expected);
        assert_eq!(unframe(&bytes), b"Hello, World!");
    }

    #[test]
    fn exactly_one_chunk_has_no_empty_chunk_before_terminator() {
        let (bytes, total) = frame(b"Hello", 5);
        assert_eq!(total, 5);
        assert_eq!(bytes, b"\x05Hello\x00");
    }

    #[test]
    fn empty_content_is_just_the_terminator() {
        let (bytes, total) = frame(b"", 5);
        assert_eq!(total, 0);
        assert_eq!(bytes, vec![0u8]);
        assert!(unframe(&bytes).is_empty());
    }

    #[test]
    fn framing_ignores_write_slicing() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (whole, _) = frame(&data, 64);
        let mut sliced = Vec::new();
        let mut writer = ChunkedWriter::new(&mut sliced, 64);
        for piece in data.chunks(7) {
            writer.write_all(piece).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(whole, sliced);
    }

    #[test]
    fn reader_accepts_single_sized_chunk_larger_than_max() {
        let mut bytes = vec![13u8];
        bytes.extend_from_slice(b"Hello, World!");
        bytes.push(0);
        assert_eq!(unframe(&bytes), b"Hello, World!");
    }

    #[test]
    fn reader_stops_at_terminator_leaving_rest() {
        let mut cursor = Cursor::new(b"\x02ab\x00\x07".to_vec());
        let mut reader = ChunkedReader::new(&mut cursor);
        assert_eq!(reader.drain().unwrap(), 2);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn truncated_chunk_is_an_error() {
        let mut reader = ChunkedReader::new(Cursor::new(b"\x05abc".to_vec()));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

use std::io::{self, Write};

/// Coalescing writer for the token stream on stdout.
///
/// With `flush_bytes == 0` every piece is written and flushed immediately
/// (lowest latency). Otherwise pieces accumulate until the buffer reaches
/// the threshold, trading latency for fewer syscalls; the parent picks.
/// Output order is strictly token order; flushes never reorder.
pub struct StreamWriter<W: Write> {
    inner: W,
    flush_bytes: usize,
    buffer: Vec<u8>,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, flush_bytes: usize) -> Self {
        Self {
            inner,
            flush_bytes,
            buffer: Vec::with_capacity(flush_bytes),
        }
    }

    /// Write one detokenised piece through the coalescing buffer.
    pub fn write_piece(&mut self, piece: &[u8]) -> io::Result<()> {
        if self.flush_bytes == 0 {
            self.inner.write_all(piece)?;
            return self.inner.flush();
        }
        self.buffer.extend_from_slice(piece);
        if self.buffer.len() >= self.flush_bytes {
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
            self.inner.flush()?;
        }
        Ok(())
    }

    /// Write framing bytes (header, newline, end-of-turn sentinel) directly,
    /// draining any buffered pieces first so framing never overtakes payload.
    pub fn write_passthrough(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.drain()?;
        self.inner.write_all(bytes)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        self.inner.flush()
    }

    fn drain(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Consume the writer, returning the underlying sink (tests).
    pub fn into_inner(mut self) -> io::Result<W> {
        self.drain()?;
        Ok(self.inner)
    }
}

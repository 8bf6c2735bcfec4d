//! Seekable streaming reads.
//!
//! Format parsers read header fields at arbitrary offsets, so every opened
//! node must support [`Seek`] as well as [`Read`]. Local files get that for
//! free. Remote resources are wrapped in a [`WindowedReader`], which keeps one
//! window of bytes in memory and refetches (with a ranged request) only when
//! the read position leaves it.

use std::io::{self, Read, Seek, SeekFrom};

/// Default size of one remote fetch: 4 MiB.
pub const DEFAULT_WINDOW_SIZE: usize = 4 * 1024 * 1024;

/// Object-safe `Read + Seek` that can cross thread boundaries.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A `'static` boxed stream suitable for use inside
/// [`spawn_blocking`](tokio::task::spawn_blocking).
pub type BoxSyncReadSeek = Box<dyn ReadSeek + 'static>;

/// Source of byte ranges for a [`WindowedReader`].
///
/// Implementations are expected to block until the range has arrived.
pub trait RangeFetch: Send {
    /// Total length of the resource in bytes.
    fn len(&self) -> u64;

    /// Fetch `len` bytes starting at `offset`.
    ///
    /// Callers never ask for bytes past the end of the resource. Returning
    /// fewer bytes than requested is allowed; returning none means the
    /// resource ended early.
    fn fetch(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// Buffered random-access reader over a [`RangeFetch`].
pub struct WindowedReader<F> {
    source: F,
    window_size: usize,
    window: Vec<u8>,
    window_start: u64,
    position: u64,
    fetches: usize,
}
impl<F: RangeFetch> WindowedReader<F> {
    pub fn new(source: F, window_size: usize) -> Self {
        Self {
            source,
            window_size: window_size.max(1),
            window: Vec::new(),
            window_start: 0,
            position: 0,
            fetches: 0,
        }
    }

    /// Total length of the underlying resource.
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ranged fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    fn window_contains(&self, position: u64) -> bool {
        position >= self.window_start && position < self.window_start + self.window.len() as u64
    }

    fn refill(&mut self) -> io::Result<()> {
        let remaining = self.source.len().saturating_sub(self.position);
        let wanted = usize::try_from(remaining).unwrap_or(usize::MAX).min(self.window_size);
        self.window = self.source.fetch(self.position, wanted)?;
        self.window_start = self.position;
        self.fetches += 1;
        Ok(())
    }
}

impl<F: RangeFetch> Read for WindowedReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.source.len() {
            return Ok(0);
        }
        if !self.window_contains(self.position) {
            self.refill()?;
            if self.window.is_empty() {
                return Ok(0);
            }
        }
        // Infallible: the window is at most `window_size` (a usize) long.
        let offset = (self.position - self.window_start) as usize;
        let available = &self.window[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<F: RangeFetch> Seek for WindowedReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.source.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative or overflowing position"));
        };
        self.position = target;
        Ok(target)
    }
}

// In: src/source/cursor.rs

//! A buffered, offset-tracking read cursor over an `InputSource`.
//!
//! `std::io::BufReader` hides the logical position once it has filled its
//! buffer, and the JSON scanner needs the exact byte offset of every value it
//! frames. `ByteCursor` keeps that offset itself: `start` is the absolute
//! offset of `buf[0]`, so the logical position is always `start + pos`.

use std::io::{self, SeekFrom};

use super::InputSource;

/// A buffered region of the input. A cursor reads through one window at a
/// time; callers that interleave several regions of the same source park a
/// window per region and swap them in with `ByteCursor::swap_window`.
pub(crate) struct ReadWindow {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    start: u64,
    /// Index of the next unread byte in `buf`.
    pos: usize,
    /// Number of valid bytes in `buf`.
    filled: usize,
    /// Refills stop at this offset while it lies ahead of the window.
    limit: u64,
}

impl ReadWindow {
    /// An empty window positioned at `start`. Refills never read past
    /// `limit` until the window has reached it.
    pub fn new(capacity: usize, start: u64, limit: u64) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            start,
            pos: 0,
            filled: 0,
            limit,
        }
    }

    /// Empties the window and moves it to `start`, keeping its buffer.
    pub fn reset(&mut self, start: u64, limit: u64) {
        self.start = start;
        self.pos = 0;
        self.filled = 0;
        self.limit = limit;
    }

    fn position(&self) -> u64 {
        self.start + self.pos as u64
    }

    /// Number of bytes the next refill may request.
    fn refill_len(&self) -> usize {
        match self.limit.checked_sub(self.start) {
            Some(ahead) if ahead > 0 => {
                usize::try_from(ahead).map_or(self.buf.len(), |ahead| ahead.min(self.buf.len()))
            }
            _ => self.buf.len(),
        }
    }
}

pub(crate) struct ByteCursor<S> {
    source: S,
    window: ReadWindow,
    /// Absolute offset the underlying source is positioned at.
    source_pos: u64,
    /// Total length of the source.
    len: u64,
}

impl<S: InputSource> ByteCursor<S> {
    pub fn new(mut source: S, capacity: usize) -> io::Result<Self> {
        let len = source.size()?;
        let start = source.stream_position()?;
        Ok(Self {
            source,
            window: ReadWindow::new(capacity, start, u64::MAX),
            source_pos: start,
            len,
        })
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.window.position()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Moves to `offset`. Seeks within the buffered window never touch the
    /// underlying source.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        let window = &mut self.window;
        let window_end = window.start + window.filled as u64;
        if offset >= window.start && offset <= window_end {
            window.pos = (offset - window.start) as usize;
            return Ok(());
        }
        if offset != self.source_pos {
            self.source.seek(SeekFrom::Start(offset))?;
            self.source_pos = offset;
        }
        window.start = offset;
        window.pos = 0;
        window.filled = 0;
        Ok(())
    }

    /// Exchanges the active window with `window`. The parked window keeps
    /// its buffered bytes and position.
    pub fn swap_window(&mut self, window: &mut ReadWindow) {
        std::mem::swap(&mut self.window, window);
    }

    /// Ensures at least one unread byte is buffered. Returns `false` at end of input.
    fn fill(&mut self) -> io::Result<bool> {
        let window = &mut self.window;
        if window.pos < window.filled {
            return Ok(true);
        }
        window.start += window.filled as u64;
        window.pos = 0;
        window.filled = 0;
        if self.source_pos != window.start {
            self.source.seek(SeekFrom::Start(window.start))?;
            self.source_pos = window.start;
        }
        let want = window.refill_len();
        let n = loop {
            match self.source.read(&mut window.buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.source_pos += n as u64;
        window.filled = n;
        Ok(n > 0)
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&mut self) -> io::Result<Option<u8>> {
        if !self.fill()? {
            return Ok(None);
        }
        Ok(Some(self.window.buf[self.window.pos]))
    }

    /// Consumes one byte previously returned by `peek`.
    pub fn bump(&mut self) {
        debug_assert!(self.window.pos < self.window.filled);
        self.window.pos += 1;
    }

    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.bump();
        }
        Ok(byte)
    }
}

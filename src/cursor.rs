//! Record-at-a-time cursors over a [`RecordWindow`].
//!
//! Cursors hide block boundaries: the reader refills its window transparently once the current block is consumed,
//! the writer saves its window as soon as it fills up.

use std::io;
use std::path::{Path, PathBuf};

use crate::record::Record;
use crate::window::{Mode, RecordWindow};

/// Sequential reader over a run file.
pub struct RunReader<T> {
    window: RecordWindow<T>,
    pos: usize,
}

impl<T: Record> RunReader<T> {
    /// Opens a run file and loads its first block of at most `capacity` records.
    pub fn open(path: &Path, capacity: usize) -> io::Result<Self> {
        let mut window = RecordWindow::new(capacity);
        window.open(path, Mode::Read)?;
        window.read()?;

        return Ok(RunReader { window, pos: 0 });
    }

    /// Returns the record under the cursor. Valid only if [`is_valid`](Self::is_valid) holds.
    pub fn current(&self) -> T {
        self.window[self.pos]
    }

    /// Checks if the cursor points to a record.
    pub fn is_valid(&self) -> bool {
        self.pos < self.window.len()
    }

    /// Moves the cursor to the next record, reading the next block when needed.
    /// Returns `false` once the run is exhausted.
    pub fn advance(&mut self) -> io::Result<bool> {
        self.pos += 1;
        if self.pos >= self.window.len() {
            if self.window.read()? == 0 {
                return Ok(false);
            }
            self.pos = 0;
        }

        return Ok(true);
    }

    pub fn path(&self) -> &Path {
        self.window.path()
    }

    /// Converts the cursor into an iterator over the remaining records.
    pub fn records(self) -> Records<T> {
        Records { reader: self, failed: false }
    }
}

/// Iterator over the remaining records of a [`RunReader`].
pub struct Records<T> {
    reader: RunReader<T>,
    failed: bool,
}

impl<T: Record> Iterator for Records<T> {
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.reader.is_valid() {
            return None;
        }

        let item = self.reader.current();
        if let Err(err) = self.reader.advance() {
            self.failed = true;
            return Some(Err(err));
        }

        return Some(Ok(item));
    }
}

/// Sequential writer of a run file.
///
/// The last partial block is only persisted by [`finish`](Self::finish); dropping a writer without finishing it
/// loses up to one window of records.
#[must_use = "a run writer must be finished to persist its last block"]
pub struct RunWriter<T> {
    window: RecordWindow<T>,
    written: u64,
}

impl<T: Record> RunWriter<T> {
    /// Creates (or truncates) a run file buffered by a window of `capacity` records.
    pub fn create(path: &Path, capacity: usize) -> io::Result<Self> {
        let mut window = RecordWindow::new(capacity);
        window.open(path, Mode::Write)?;

        return Ok(RunWriter { window, written: 0 });
    }

    /// Appends a record, saving the window once it is full.
    pub fn push(&mut self, item: T) -> io::Result<()> {
        self.window.push(item);
        self.written += 1;
        if self.window.is_full() {
            self.window.save()?;
        }

        return Ok(());
    }

    pub fn path(&self) -> &Path {
        self.window.path()
    }

    /// Number of records pushed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Saves the pending records and closes the file.
    /// Returns the run path and the total number of records written.
    pub fn finish(mut self) -> io::Result<(PathBuf, u64)> {
        let pending = self.window.len();
        self.window.resize(pending);
        self.window.save()?;
        self.window.close();

        return Ok((self.window.path().to_path_buf(), self.written));
    }
}

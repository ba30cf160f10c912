//! Bounded record window.
//!
//! A [`RecordWindow`] is the unit of I/O against one backing file: it owns a single open file handle and a
//! fixed-capacity block of records that is filled from, or flushed to, that file in one go. Records are encoded and
//! decoded through a byte block of at most [`BLOCK_SIZE`] bytes, so a window costs its records plus that block.

use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::ops::Index;
use std::path::{Path, PathBuf};

use rayon;

use crate::record::{self, Record};

/// Upper bound of the byte block a window encodes and decodes records through.
pub const BLOCK_SIZE: usize = 4096;

/// File access mode of a window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// The file is opened for reading from the beginning.
    Read,
    /// The file is created (or truncated) for writing.
    Write,
}

/// Fixed-capacity in-memory block of records backed by one file.
pub struct RecordWindow<T> {
    capacity: usize,
    records: Vec<T>,
    scratch: Vec<u8>,
    file: Option<fs::File>,
    mode: Mode,
    path: PathBuf,
}

impl<T: Record> RecordWindow<T> {
    /// Creates a closed window able to hold `capacity` records.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "window capacity must be positive");

        RecordWindow {
            capacity,
            records: Vec::with_capacity(capacity),
            scratch: Vec::with_capacity(block_records::<T>(capacity) * T::WIDTH),
            file: None,
            mode: Mode::Read,
            path: PathBuf::new(),
        }
    }

    /// Opens `path` in the given mode, releasing a previously opened handle first.
    pub fn open(&mut self, path: &Path, mode: Mode) -> io::Result<()> {
        self.file = None;
        self.records.clear();

        let file = match mode {
            Mode::Read => fs::File::open(path)?,
            Mode::Write => fs::File::create(path)?,
        };

        self.file = Some(file);
        self.mode = mode;
        self.path = path.to_path_buf();

        return Ok(());
    }

    /// Releases the file handle. The window contents are kept.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Fills the window from the current file position.
    /// Returns the number of records read, `0` at the end of the file.
    pub fn read(&mut self) -> io::Result<usize> {
        let file = Self::handle(&mut self.file, self.mode, Mode::Read)?;
        let block = block_records::<T>(self.capacity);

        self.records.clear();
        while self.records.len() < self.capacity {
            let wanted = (self.capacity - self.records.len()).min(block) * T::WIDTH;
            self.scratch.resize(wanted, 0);

            let filled = read_full(file, &mut self.scratch)?;
            if filled % T::WIDTH != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: trailing partial record of {} bytes", self.path.display(), filled % T::WIDTH),
                ));
            }

            self.records
                .extend(self.scratch[..filled].chunks_exact(T::WIDTH).map(T::decode));
            if filled < wanted {
                break;
            }
        }

        return Ok(self.records.len());
    }

    /// Writes the window contents at the current file position and empties the window.
    /// Does nothing if the window is empty.
    pub fn save(&mut self) -> io::Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }

        let file = Self::handle(&mut self.file, self.mode, Mode::Write)?;
        write_blocks(&self.records, &mut self.scratch, block_records::<T>(self.capacity), file)?;
        self.records.clear();

        return Ok(());
    }

    /// Writes the window contents to an arbitrary writer, leaving the window untouched.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        write_blocks(&self.records, &mut self.scratch, block_records::<T>(self.capacity), writer)
    }

    /// Moves the file position by `offset` bytes relative to the current one.
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(file) => file.seek(SeekFrom::Current(offset)),
            None => Err(not_open(&self.path)),
        }
    }

    /// Length of the backing file in bytes.
    pub fn file_len(&self) -> io::Result<u64> {
        match self.file.as_ref() {
            Some(file) => Ok(file.metadata()?.len()),
            None => Err(not_open(&self.path)),
        }
    }

    /// Truncates the window to `len` records. Never grows the window.
    pub fn resize(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Appends a record to be written by the next [`save`](Self::save).
    pub fn push(&mut self, item: T) {
        debug_assert!(self.records.len() < self.capacity, "window overflow");
        self.records.push(item);
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records the window holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks if the window reached its capacity.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    fn handle(file: &mut Option<fs::File>, mode: Mode, wanted: Mode) -> io::Result<&mut fs::File> {
        match file.as_mut() {
            Some(_) if mode != wanted => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("window is opened in {:?} mode", mode),
            )),
            Some(file) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "window is not opened")),
        }
    }
}

impl<T> Index<usize> for RecordWindow<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.records[index]
    }
}

impl<T: Send> rayon::slice::ParallelSliceMut<T> for RecordWindow<T> {
    fn as_parallel_slice_mut(&mut self) -> &mut [T] {
        self.records.as_mut_slice()
    }
}

/// Number of records encoded or decoded at a time by a window of `capacity` records.
fn block_records<T: Record>(capacity: usize) -> usize {
    (BLOCK_SIZE / T::WIDTH).clamp(1, capacity.max(1))
}

/// Reads until `buf` is full or the end of the file. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    return Ok(filled);
}

fn write_blocks<T: Record, W: Write>(
    records: &[T],
    scratch: &mut Vec<u8>,
    block: usize,
    writer: &mut W,
) -> io::Result<()> {
    for chunk in records.chunks(block) {
        record::encode_all(chunk, scratch);
        writer.write_all(scratch)?;
    }

    return Ok(());
}

fn not_open(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("window for {} is not opened", path.display()),
    )
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{Mode, RecordWindow, BLOCK_SIZE};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_raw(path: &std::path::Path, values: &[i32]) {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(path, bytes).unwrap();
    }

    #[rstest]
    fn test_read_partial_window(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("input");
        write_raw(&path, &[1, 2, 3, 4, 5]);

        let mut window = RecordWindow::<i32>::new(2);
        window.open(&path, Mode::Read).unwrap();
        assert_eq!(window.file_len().unwrap(), 20);

        assert_eq!(window.read().unwrap(), 2);
        assert_eq!(window.as_slice(), &[1, 2]);
        assert_eq!(window.read().unwrap(), 2);
        assert_eq!(window[1], 4);
        assert_eq!(window.read().unwrap(), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0], 5);
        assert_eq!(window.read().unwrap(), 0);
        assert!(window.is_empty());
    }

    #[rstest]
    fn test_trailing_partial_record(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("broken");
        fs::write(&path, [1u8, 0, 0, 0, 7]).unwrap();

        let mut window = RecordWindow::<i32>::new(4);
        window.open(&path, Mode::Read).unwrap();
        let err = window.read().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[rstest]
    fn test_save_and_reopen(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("run");

        let mut window = RecordWindow::<i32>::new(3);
        window.open(&path, Mode::Write).unwrap();
        window.save().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        window.push(7);
        window.push(-1);
        window.push(9);
        assert!(window.is_full());
        window.save().unwrap();
        assert!(window.is_empty());

        window.push(10);
        window.push(11);
        window.resize(1);
        window.save().unwrap();

        window.open(&path, Mode::Read).unwrap();
        assert_eq!(window.read().unwrap(), 3);
        assert_eq!(window.as_slice(), &[7, -1, 9]);
        assert_eq!(window.read().unwrap(), 1);
        assert_eq!(window.as_slice(), &[10]);
    }

    #[rstest]
    fn test_seek_back_rereads_boundary(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("input");
        write_raw(&path, &[1, 2, 3, 4]);

        let mut window = RecordWindow::<i32>::new(2);
        window.open(&path, Mode::Read).unwrap();
        window.read().unwrap();
        assert_eq!(window.seek(-4).unwrap(), 4);
        window.read().unwrap();
        assert_eq!(window.as_slice(), &[2, 3]);
    }

    #[rstest]
    #[case(3, 12)]
    #[case(BLOCK_SIZE / 4, BLOCK_SIZE)]
    #[case(10_000, BLOCK_SIZE)]
    fn test_block_bounded_by_window(tmp_dir: tempfile::TempDir, #[case] capacity: usize, #[case] block_bytes: usize) {
        let path = tmp_dir.path().join("run");
        let items = Vec::from_iter(0..(capacity as i32 * 2 + 1));

        let mut window = RecordWindow::<i32>::new(capacity);
        window.open(&path, Mode::Write).unwrap();
        for chunk in items.chunks(capacity) {
            for item in chunk {
                window.push(*item);
            }
            window.save().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), items.len() as u64 * 4);

        let mut actual = Vec::new();
        window.open(&path, Mode::Read).unwrap();
        while window.read().unwrap() > 0 {
            actual.extend_from_slice(window.as_slice());
        }
        assert_eq!(actual, items);
        assert_eq!(window.scratch.len(), block_bytes);
    }

    #[rstest]
    fn test_mode_mismatch(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("run");

        let mut window = RecordWindow::<u64>::new(2);
        assert!(window.read().is_err());

        window.open(&path, Mode::Write).unwrap();
        assert!(window.read().is_err());
    }

    #[rstest]
    fn test_open_missing_file(tmp_dir: tempfile::TempDir) {
        let mut window = RecordWindow::<u64>::new(2);
        let err = window.open(&tmp_dir.path().join("missing"), Mode::Read).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}

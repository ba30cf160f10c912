//! Sortedness check of record files.

use std::cmp::Ordering;
use std::io;
use std::path::Path;

use log;

use crate::files;
use crate::record::Record;
use crate::sort::{Phase, SortError};
use crate::window::{Mode, RecordWindow};

/// Result of a sortedness check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Sortedness {
    /// Number of records inspected before the check stopped.
    pub records_checked: u64,
    /// Index of the first record that is smaller than its predecessor.
    pub first_violation: Option<u64>,
}

impl Sortedness {
    pub fn is_sorted(&self) -> bool {
        self.first_violation.is_none()
    }
}

/// Checks that the records of `path` are in ascending order, reading at most `buffer_size` bytes at a time.
pub fn check_sorted<T>(path: &Path, buffer_size: usize) -> Result<Sortedness, SortError>
where
    T: Record + Ord,
{
    check_sorted_by(path, buffer_size, T::cmp)
}

/// Checks that the records of `path` are ordered according to `compare`, stopping at the first out-of-order pair.
///
/// The file is scanned window by window. The last record of a window is carried over and compared with the first
/// record of the next one, so any buffer holding at least one record works.
pub fn check_sorted_by<T, F>(path: &Path, buffer_size: usize, compare: F) -> Result<Sortedness, SortError>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    if T::WIDTH == 0 || buffer_size < T::WIDTH {
        return Err(SortError::Config(format!(
            "check buffer of {} bytes cannot hold a {}-byte record",
            buffer_size,
            T::WIDTH
        )));
    }
    if !files::is_regular_file(path) {
        return Err(SortError::NotFound(path.to_path_buf()));
    }

    let failed = |err: io::Error| SortError::io(Phase::Check, path, err);

    let mut window = RecordWindow::<T>::new(buffer_size / T::WIDTH);
    window.open(path, Mode::Read).map_err(failed)?;

    let mut previous: Option<T> = None;
    let mut checked: u64 = 0;
    loop {
        if window.read().map_err(failed)? == 0 {
            return Ok(Sortedness {
                records_checked: checked,
                first_violation: None,
            });
        }

        for record in window.as_slice() {
            if let Some(prev) = &previous {
                if compare(prev, record) == Ordering::Greater {
                    log::debug!("{}: record {} is out of order", path.display(), checked);

                    return Ok(Sortedness {
                        records_checked: checked + 1,
                        first_violation: Some(checked),
                    });
                }
            }
            previous = Some(*record);
            checked += 1;
        }
    }
}

//! Input splitting into sorted runs.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use rayon::slice::ParallelSliceMut;

use crate::files;
use crate::record::Record;
use crate::registry::RunRegistry;
use crate::sort::{CancellationToken, Phase, SortError};
use crate::window::{Mode, RecordWindow};

/// Result of the split phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Number of records read from the input.
    pub records: u64,
    /// Number of runs created.
    pub runs: usize,
}

/// Streams an input file through a single window, persisting every sorted window as a run.
pub struct ChunkSplitter<'a> {
    tmp_dir: &'a Path,
    capacity: usize,
    thread_pool: &'a rayon::ThreadPool,
    cancel: &'a CancellationToken,
}

impl<'a> ChunkSplitter<'a> {
    /// Creates a splitter producing runs of at most `capacity` records in `tmp_dir`.
    /// Windows are sorted on `thread_pool`.
    pub fn new(
        tmp_dir: &'a Path,
        capacity: usize,
        thread_pool: &'a rayon::ThreadPool,
        cancel: &'a CancellationToken,
    ) -> Self {
        ChunkSplitter {
            tmp_dir,
            capacity,
            thread_pool,
            cancel,
        }
    }

    /// Splits `input` into sorted runs and registers them in `registry`.
    pub fn split<T, F>(&self, input: &Path, compare: F, registry: &RunRegistry) -> Result<SplitOutcome, SortError>
    where
        T: Record,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let failed = |err: io::Error| SortError::io(Phase::Split, input, err);

        let mut window = RecordWindow::<T>::new(self.capacity);
        window.open(input, Mode::Read).map_err(failed)?;

        let file_len = window.file_len().map_err(failed)?;
        if file_len % T::WIDTH as u64 != 0 {
            return Err(SortError::Config(format!(
                "{} is {} bytes long, which is not a multiple of the {}-byte record width",
                input.display(),
                file_len,
                T::WIDTH
            )));
        }

        let total = file_len / T::WIDTH as u64;
        log::debug!("{} holds {} records", input.display(), total);

        let mut outcome = SplitOutcome { records: 0, runs: 0 };
        while outcome.records < total {
            self.cancel.check()?;

            let count = window.read().map_err(failed)?;
            if count == 0 {
                return Err(failed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("input ended after {} of {} records", outcome.records, total),
                )));
            }
            outcome.records += count as u64;

            self.thread_pool.install(|| {
                window.par_sort_unstable_by(compare);
            });

            registry.insert(self.save_run(&mut window)?);
            outcome.runs += 1;
        }

        return Ok(outcome);
    }

    fn save_run<T: Record>(&self, window: &mut RecordWindow<T>) -> Result<PathBuf, SortError> {
        let path = files::unique_run_path(self.tmp_dir).map_err(|err| SortError::io(Phase::Split, self.tmp_dir, err))?;

        let mut file = fs::File::create(&path).map_err(|err| SortError::io(Phase::Split, &path, err))?;
        window
            .write_to(&mut file)
            .map_err(|err| SortError::io(Phase::Split, &path, err))?;
        log::debug!("run {} saved: {} records", path.display(), window.len());

        return Ok(path);
    }
}

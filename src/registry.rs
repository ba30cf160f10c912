//! Shared registry of run files available for merging.

use std::collections::VecDeque;
use std::path::PathBuf;

use parking_lot::Mutex;

/// Lock-protected collection of run file paths shared by merge workers.
///
/// Runs inserted during a round are held back until the next [`begin_round`](Self::begin_round), so a round only
/// ever merges runs that existed when it started. Every operation takes the same lock, which makes
/// [`pop_pair`](Self::pop_pair) atomic: a run handed to one worker is never handed to another.
#[derive(Default)]
pub struct RunRegistry {
    inner: Mutex<Runs>,
}

#[derive(Default)]
struct Runs {
    /// Runs the current round may still merge.
    ready: VecDeque<PathBuf>,
    /// Runs produced since the current round started.
    produced: Vec<PathBuf>,
}

impl RunRegistry {
    pub fn new() -> Self {
        RunRegistry::default()
    }

    /// Registers a complete run.
    pub fn insert(&self, run: PathBuf) {
        self.inner.lock().produced.push(run);
    }

    /// Takes two runs for merging, or `None` if fewer than two are left for the current round.
    pub fn pop_pair(&self) -> Option<(PathBuf, PathBuf)> {
        let mut runs = self.inner.lock();
        if runs.ready.len() < 2 {
            return None;
        }

        let first = runs.ready.pop_front()?;
        let second = runs.ready.pop_front()?;

        return Some((first, second));
    }

    /// Starts a new round: runs produced so far become mergeable, after any run left over from the previous round.
    /// Returns the number of runs the round starts with.
    pub fn begin_round(&self) -> usize {
        let mut runs = self.inner.lock();
        let produced = std::mem::take(&mut runs.produced);
        runs.ready.extend(produced);

        return runs.ready.len();
    }

    /// Total number of registered runs.
    pub fn len(&self) -> usize {
        let runs = self.inner.lock();
        runs.ready.len() + runs.produced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns the only registered run. Returns `None` unless exactly one run is registered.
    pub fn take_single(&self) -> Option<PathBuf> {
        let mut runs = self.inner.lock();
        let produced = std::mem::take(&mut runs.produced);
        runs.ready.extend(produced);

        if runs.ready.len() != 1 {
            return None;
        }

        return runs.ready.pop_front();
    }
}

//! Round-based parallel merging of runs.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::atomic::{self, AtomicBool};
use std::time::Instant;

use log;
use parking_lot::Mutex;

use crate::files;
use crate::merger::{self, MergeBudget};
use crate::record::Record;
use crate::registry::RunRegistry;
use crate::sort::{CancellationToken, Phase, SortError};

/// Reduces the runs of a [`RunRegistry`] to a single run through rounds of concurrent pairwise merges.
///
/// A round starts `min(workers, runs / 2)` workers, each taking pairs of runs until none are left for the round.
/// The round ends when every worker has returned, so the next round sees all runs the previous one produced.
pub struct MergeCoordinator<'a> {
    tmp_dir: &'a Path,
    budget: MergeBudget,
    workers: usize,
    thread_pool: &'a rayon::ThreadPool,
    cancel: &'a CancellationToken,
    progress: log::Level,
}

impl<'a> MergeCoordinator<'a> {
    /// Creates a coordinator.
    ///
    /// # Arguments
    /// * `tmp_dir` - Directory merged runs are created in
    /// * `budget` - Window capacities of one merge task
    /// * `workers` - Maximum number of concurrent merges
    /// * `thread_pool` - Pool the merges run on, expected to have at least `workers` threads
    /// * `cancel` - Token polled between rounds and between merges
    /// * `progress` - Log level of the per-round progress reports
    pub fn new(
        tmp_dir: &'a Path,
        budget: MergeBudget,
        workers: usize,
        thread_pool: &'a rayon::ThreadPool,
        cancel: &'a CancellationToken,
        progress: log::Level,
    ) -> Self {
        MergeCoordinator {
            tmp_dir,
            budget,
            workers,
            thread_pool,
            cancel,
            progress,
        }
    }

    /// Merges the registered runs until at most one remains. Returns the number of rounds performed.
    ///
    /// The first worker failure ends the job; runs left on disk at that point are not removed.
    pub fn run<T, F>(&self, registry: &RunRegistry, compare: F) -> Result<usize, SortError>
    where
        T: Record,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let mut rounds = 0;

        loop {
            self.cancel.check()?;

            let runs = registry.begin_round();
            if runs < 2 {
                break;
            }

            rounds += 1;
            let workers = self.workers.min(runs / 2).max(1);
            let started = Instant::now();
            log::log!(
                self.progress,
                "merge round {}: {} runs, {} workers",
                rounds,
                runs,
                workers
            );

            let failure: Mutex<Option<SortError>> = Mutex::new(None);
            let aborted = AtomicBool::new(false);

            self.thread_pool.scope(|scope| {
                for worker in 0..workers {
                    let (failure, aborted) = (&failure, &aborted);
                    scope.spawn(move |_| {
                        if let Err(err) = self.merge_pairs(worker, registry, compare, aborted) {
                            log::error!("merge worker {} failed: {}", worker, err);
                            aborted.store(true, atomic::Ordering::SeqCst);
                            failure.lock().get_or_insert(err);
                        }
                    });
                }
            });

            if let Some(err) = failure.into_inner() {
                return Err(err);
            }

            log::log!(
                self.progress,
                "merge round {} done in {:?}, {} runs remain",
                rounds,
                started.elapsed(),
                registry.len()
            );
        }

        return Ok(rounds);
    }

    fn merge_pairs<T, F>(
        &self,
        worker: usize,
        registry: &RunRegistry,
        compare: F,
        aborted: &AtomicBool,
    ) -> Result<(), SortError>
    where
        T: Record,
        F: Fn(&T, &T) -> Ordering + Copy,
    {
        while !aborted.load(atomic::Ordering::SeqCst) {
            self.cancel.check()?;

            let (left, right) = match registry.pop_pair() {
                Some(pair) => pair,
                None => break,
            };

            let output =
                files::unique_run_path(self.tmp_dir).map_err(|err| SortError::io(Phase::Merge, self.tmp_dir, err))?;
            log::debug!(
                "worker {} merging {} and {} into {}",
                worker,
                left.display(),
                right.display(),
                output.display()
            );

            let records = merger::merge_runs(&left, &right, &output, self.budget, compare)?;

            for input in [&left, &right] {
                fs::remove_file(input).map_err(|err| SortError::io(Phase::Merge, input, err))?;
            }

            log::debug!("worker {} merged {} records into {}", worker, records, output.display());
            registry.insert(output);
        }

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use rstest::*;

    use super::MergeCoordinator;
    use crate::cursor::{RunReader, RunWriter};
    use crate::merger::MergeBudget;
    use crate::registry::RunRegistry;
    use crate::sort::{CancellationToken, Phase, SortError};

    const BUDGET: MergeBudget = MergeBudget {
        input_capacity: 2,
        output_capacity: 4,
    };

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn thread_pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    fn write_run(dir: &Path, name: &str, items: &[u32]) -> PathBuf {
        let path = dir.join(name);
        let mut writer = RunWriter::create(&path, 2).unwrap();
        for item in items {
            writer.push(*item).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn read_run(path: &Path) -> Vec<u32> {
        RunReader::open(path, 3)
            .unwrap()
            .records()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[rstest]
    #[case(1, 0, 1)]
    #[case(2, 1, 1)]
    #[case(3, 2, 2)]
    #[case(4, 2, 1)]
    #[case(4, 2, 4)]
    #[case(6, 3, 8)]
    #[case(11, 4, 3)]
    fn test_rounds(tmp_dir: tempfile::TempDir, #[case] runs: u32, #[case] rounds: usize, #[case] workers: usize) {
        let registry = RunRegistry::new();
        for run in 0..runs {
            registry.insert(write_run(tmp_dir.path(), &format!("leaf-{}", run), &[run, run + 100, run + 200]));
        }

        let pool = thread_pool(workers);
        let cancel = CancellationToken::new();
        let coordinator = MergeCoordinator::new(tmp_dir.path(), BUDGET, workers, &pool, &cancel, log::Level::Debug);
        assert_eq!(coordinator.run(&registry, u32::cmp).unwrap(), rounds);

        let result = registry.take_single().unwrap();
        let mut expected: Vec<u32> = (0..runs).flat_map(|run| [run, run + 100, run + 200]).collect();
        expected.sort();
        assert_eq!(read_run(&result), expected);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 1);
    }

    #[rstest]
    fn test_single_worker_merges_every_pair(tmp_dir: tempfile::TempDir) {
        let registry = RunRegistry::new();
        for run in 0..5u32 {
            registry.insert(write_run(tmp_dir.path(), &format!("leaf-{}", run), &[run + 20, run + 10, run]));
        }

        let descending = |a: &u32, b: &u32| b.cmp(a);
        let pool = thread_pool(1);
        let cancel = CancellationToken::new();
        let coordinator = MergeCoordinator::new(tmp_dir.path(), BUDGET, 1, &pool, &cancel, log::Level::Debug);
        assert_eq!(coordinator.run(&registry, descending).unwrap(), 3);

        let mut expected: Vec<u32> = (0..5).flat_map(|run| [run + 20, run + 10, run]).collect();
        expected.sort_by(descending);
        assert_eq!(read_run(&registry.take_single().unwrap()), expected);
    }

    #[rstest]
    fn test_empty_registry(tmp_dir: tempfile::TempDir) {
        let registry = RunRegistry::new();
        let pool = thread_pool(2);
        let cancel = CancellationToken::new();
        let coordinator = MergeCoordinator::new(tmp_dir.path(), BUDGET, 2, &pool, &cancel, log::Level::Debug);

        assert_eq!(coordinator.run(&registry, u32::cmp).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[rstest]
    fn test_worker_failure_keeps_files(tmp_dir: tempfile::TempDir) {
        let registry = RunRegistry::new();
        let first = write_run(tmp_dir.path(), "first", &[1, 3]);
        let missing = tmp_dir.path().join("missing");
        registry.insert(first.clone());
        registry.insert(missing.clone());

        let pool = thread_pool(1);
        let cancel = CancellationToken::new();
        let coordinator = MergeCoordinator::new(tmp_dir.path(), BUDGET, 1, &pool, &cancel, log::Level::Debug);
        let result = coordinator.run(&registry, u32::cmp);

        match result {
            Err(SortError::IO { phase, path, .. }) => {
                assert_eq!(phase, Phase::Merge);
                assert_eq!(path, missing);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(first.exists());
    }

    #[rstest]
    fn test_cancelled_between_rounds(tmp_dir: tempfile::TempDir) {
        let registry = RunRegistry::new();
        registry.insert(write_run(tmp_dir.path(), "a", &[1]));
        registry.insert(write_run(tmp_dir.path(), "b", &[2]));

        let pool = thread_pool(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let coordinator = MergeCoordinator::new(tmp_dir.path(), BUDGET, 1, &pool, &cancel, log::Level::Debug);

        assert!(matches!(coordinator.run(&registry, u32::cmp), Err(SortError::Cancelled)));
        assert_eq!(registry.len(), 2);
    }
}

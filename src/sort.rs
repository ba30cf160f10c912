//! External sorter.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coordinator::MergeCoordinator;
use crate::files;
use crate::merger::MergeBudget;
use crate::record::Record;
use crate::registry::RunRegistry;
use crate::split::ChunkSplitter;

/// Default number of merge workers.
pub const DEFAULT_WORKERS: usize = 8;
/// Default total memory budget of the I/O buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024 * 1024;
/// Upper bound of the split buffer unless configured explicitly.
pub const DEFAULT_SPLIT_LIMIT: usize = 30 * 1024 * 1024;

/// Sorting job phase an I/O error happened in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Input splitting into sorted runs.
    Split,
    /// Pairwise run merging.
    Merge,
    /// Publishing the final run.
    Finish,
    /// Sortedness check.
    Check,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Split => "split",
            Phase::Merge => "merge",
            Phase::Finish => "finish",
            Phase::Check => "check",
        })
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input file does not exist or is not a regular file.
    NotFound(PathBuf),
    /// Invalid configuration or input layout.
    Config(String),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// I/O operation on an input, run or output file failed.
    IO {
        phase: Phase,
        path: PathBuf,
        source: io::Error,
    },
    /// The job was cancelled through its [`CancellationToken`].
    Cancelled,
}

impl SortError {
    pub(crate) fn io(phase: Phase, path: &Path, source: io::Error) -> Self {
        SortError::IO {
            phase,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO { source, .. } => Some(source),
            SortError::NotFound(_) | SortError::Config(_) | SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::NotFound(path) => write!(f, "input file not found: {}", path.display()),
            SortError::Config(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO { phase, path, source } => {
                write!(f, "I/O operation failed during {} on {}: {}", phase, path.display(), source)
            }
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

/// Cooperative cancellation flag shared between a sorter and its caller.
///
/// The sorter polls it between split windows, between merge rounds and before each pairwise merge. A merge that is
/// already running is finished first.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(atomic::Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), SortError> {
        if self.is_cancelled() {
            Err(SortError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sorting job configuration.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Total memory budget of the I/O buffers in bytes.
    pub buffer_size: usize,
    /// Split phase buffer size in bytes. Defaults to `buffer_size` capped by [`DEFAULT_SPLIT_LIMIT`].
    pub split_buffer_size: Option<usize>,
    /// Directory temporary runs are created in. Defaults to the OS temporary directory.
    pub tmp_dir: Option<PathBuf>,
    /// Number of merge workers.
    pub workers: usize,
    /// Reports merge progress and phase timings at info level.
    pub verbose: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            split_buffer_size: None,
            tmp_dir: None,
            workers: DEFAULT_WORKERS,
            verbose: false,
        }
    }
}

/// Window capacities, in records, derived from a [`SortConfig`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferPlan {
    /// Split phase window.
    pub split_capacity: usize,
    /// Per-worker merge windows.
    pub merge: MergeBudget,
}

impl SortConfig {
    /// Computes window capacities for records of `width` bytes.
    ///
    /// Each worker gets `buffer_size / workers` bytes: a quarter for each merge input and a half for the merge output.
    pub fn plan(&self, width: usize) -> Result<BufferPlan, SortError> {
        if width == 0 {
            return Err(SortError::Config("record width must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(SortError::Config("workers number must be positive".to_string()));
        }

        let split_bytes = self
            .split_buffer_size
            .unwrap_or_else(|| self.buffer_size.min(DEFAULT_SPLIT_LIMIT));
        let split_capacity = split_bytes / width;
        if split_capacity == 0 {
            return Err(SortError::Config(format!(
                "split buffer of {} bytes cannot hold a {}-byte record",
                split_bytes, width
            )));
        }

        let per_worker = self.buffer_size / self.workers;
        let merge = MergeBudget {
            input_capacity: per_worker / 4 / width,
            output_capacity: per_worker / 2 / width,
        };
        if merge.input_capacity == 0 {
            return Err(SortError::Config(format!(
                "buffer of {} bytes split across {} workers cannot hold a {}-byte record per merge input",
                self.buffer_size, self.workers, width
            )));
        }

        return Ok(BufferPlan { split_capacity, merge });
    }
}

/// Sorting job summary.
#[derive(Debug, Clone)]
pub struct SortSummary {
    /// Sorted file.
    pub path: PathBuf,
    /// Number of records sorted.
    pub records: u64,
    /// Number of runs produced by the split phase.
    pub runs: usize,
    /// Number of merge rounds.
    pub rounds: usize,
    /// Wall time of the whole job.
    pub elapsed: Duration,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T: Record> {
    config: SortConfig,
    cancel: CancellationToken,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorterBuilder<T> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(config: SortConfig) -> Self {
        ExternalSorterBuilder {
            config,
            cancel: CancellationToken::new(),
            item_type: PhantomData,
        }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<T>, SortError> {
        ExternalSorter::new(self.config, self.cancel)
    }

    /// Sets the total memory budget of the I/O buffers in bytes.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> ExternalSorterBuilder<T> {
        self.config.buffer_size = buffer_size;
        return self;
    }

    /// Sets the split phase buffer size in bytes.
    pub fn with_split_buffer_size(mut self, buffer_size: usize) -> ExternalSorterBuilder<T> {
        self.config.split_buffer_size = Some(buffer_size);
        return self;
    }

    /// Sets number of threads to be used to merge runs in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T> {
        self.config.workers = threads_number;
        return self;
    }

    /// Sets directory to be used to store temporary runs.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T> {
        self.config.tmp_dir = Some(path.into());
        return self;
    }

    /// Enables progress and timing reports at info level.
    pub fn with_verbose(mut self, verbose: bool) -> ExternalSorterBuilder<T> {
        self.config.verbose = verbose;
        return self;
    }

    /// Sets the token the sorter polls for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> ExternalSorterBuilder<T> {
        self.cancel = token;
        return self;
    }
}

impl<T: Record> Default for ExternalSorterBuilder<T> {
    fn default() -> Self {
        ExternalSorterBuilder::from_config(SortConfig::default())
    }
}

/// External sorter of fixed-width record files.
pub struct ExternalSorter<T: Record> {
    /// Merge workers thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary runs.
    tmp_dir: PathBuf,
    plan: BufferPlan,
    workers: usize,
    verbose: bool,
    cancel: CancellationToken,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorter<T> {
    /// Creates a new external sorter instance.
    ///
    /// Every configuration problem is reported here, before any file is touched.
    ///
    /// # Arguments
    /// * `config` - Sorting job configuration
    /// * `cancel` - Token polled for cancellation
    pub fn new(config: SortConfig, cancel: CancellationToken) -> Result<Self, SortError> {
        let plan = config.plan(T::WIDTH)?;
        log::debug!("buffer plan: {:?}", plan);

        return Ok(ExternalSorter {
            tmp_dir: Self::init_tmp_directory(config.tmp_dir.as_deref())?,
            thread_pool: Self::init_thread_pool(config.workers)?,
            plan,
            workers: config.workers,
            verbose: config.verbose,
            cancel,
            item_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|idx| format!("merge-worker-{}", idx))
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<PathBuf, SortError> {
        let tmp_dir = match tmp_path {
            Some(tmp_path) => tmp_path.to_path_buf(),
            None => std::env::temp_dir(),
        };

        if !tmp_dir.is_dir() {
            return Err(SortError::Config(format!(
                "temporary directory {} does not exist",
                tmp_dir.display()
            )));
        }

        log::info!("using {} as a temporary directory", tmp_dir.display());

        return Ok(tmp_dir);
    }

    /// Buffer capacities the sorter works with.
    pub fn plan(&self) -> BufferPlan {
        self.plan
    }

    /// Sorts `input` into `output` in ascending order.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortSummary, SortError>
    where
        T: Ord,
    {
        self.sort_by(input, output, T::cmp)
    }

    /// Sorts `input` into `output` using a custom compare function.
    ///
    /// # Arguments
    /// * `input` - File of records to be sorted
    /// * `output` - Path the sorted file is moved to
    /// * `compare` - Function be be used to compare records
    pub fn sort_by<F>(&self, input: &Path, output: &Path, compare: F) -> Result<SortSummary, SortError>
    where
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let mut summary = self.sort_to_run_by(input, compare)?;

        files::move_file(&summary.path, output).map_err(|err| SortError::io(Phase::Finish, output, err))?;
        summary.path = output.to_path_buf();
        log::info!("sorted file: {}", output.display());

        return Ok(summary);
    }

    /// Sorts `input` in ascending order, leaving the result as a run in the temporary directory.
    pub fn sort_to_run(&self, input: &Path) -> Result<SortSummary, SortError>
    where
        T: Ord,
    {
        self.sort_to_run_by(input, T::cmp)
    }

    /// Sorts `input` using a custom compare function, leaving the result as a run in the temporary directory.
    /// The returned summary holds the run path; the caller owns the file from then on.
    pub fn sort_to_run_by<F>(&self, input: &Path, compare: F) -> Result<SortSummary, SortError>
    where
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let started = Instant::now();
        let progress = self.progress_level();

        if !files::is_regular_file(input) {
            return Err(SortError::NotFound(input.to_path_buf()));
        }

        let registry = RunRegistry::new();

        log::log!(progress, "splitting {} ...", input.display());
        let splitter = ChunkSplitter::new(&self.tmp_dir, self.plan.split_capacity, &self.thread_pool, &self.cancel);
        let split = splitter.split(input, compare, &registry)?;
        log::log!(
            progress,
            "split done in {:?}: {} records, {} runs",
            started.elapsed(),
            split.records,
            split.runs
        );

        let merge_started = Instant::now();
        let coordinator = MergeCoordinator::new(
            &self.tmp_dir,
            self.plan.merge,
            self.workers,
            &self.thread_pool,
            &self.cancel,
            progress,
        );
        let rounds = coordinator.run(&registry, compare)?;
        log::log!(progress, "merge done in {:?}: {} rounds", merge_started.elapsed(), rounds);

        let path = match registry.take_single() {
            Some(run) => run,
            None => {
                log::debug!("empty input, creating empty result");
                files::create_empty_run(&self.tmp_dir)
                    .map_err(|err| SortError::io(Phase::Finish, &self.tmp_dir, err))?
            }
        };

        return Ok(SortSummary {
            path,
            records: split.records,
            runs: split.runs,
            rounds,
            elapsed: started.elapsed(),
        });
    }

    fn progress_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

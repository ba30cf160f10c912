//! `ext-merge-sort` is an external merge sort of files made of fixed-width binary records.
//!
//! External sorting is required when the data being sorted do not fit into the main memory (RAM) of a computer and
//! instead must reside in slower external memory, usually a hard disk drive. Sorting is achieved in two phases.
//! During the first phase the input is read window by window, each window is sorted in memory and saved as a
//! temporary *run*. During the second phase runs are merged pairwise, round after round, by a pool of worker
//! threads until a single sorted run remains. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `ext-merge-sort` supports the following features:
//!
//! * **Bounded memory:**
//!   every file is accessed through a fixed-capacity record window, the total size of all windows is bounded by
//!   the configured buffer size.
//! * **Record agnostic:**
//!   any type implementing [`Record`] (a fixed serialized width plus encoding/decoding) can be sorted. Integers and
//!   fixed-size byte arrays are supported out of the box.
//! * **Custom ordering:**
//!   records can be sorted by their natural order or by a custom compare function.
//! * **Parallel merging:**
//!   merge rounds are executed by a pool of worker threads, each merging disjoint pairs of runs.
//! * **Cancellation:**
//!   a running job can be stopped through a [`CancellationToken`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_merge_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter<i32> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_buffer_size(64 * 1024 * 1024)
//!         .with_threads_number(8)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.sort(Path::new("input.bin"), Path::new("output.bin")).unwrap();
//!     println!("sorted {} records in {:?}", summary.records, summary.elapsed);
//! }
//! ```

pub mod check;
pub mod coordinator;
pub mod cursor;
pub mod files;
pub mod merger;
pub mod record;
pub mod registry;
pub mod sort;
pub mod split;
pub mod window;

pub use check::{check_sorted, check_sorted_by, Sortedness};
pub use coordinator::MergeCoordinator;
pub use cursor::{RunReader, RunWriter};
pub use merger::{merge_runs, MergeBudget};
pub use record::Record;
pub use registry::RunRegistry;
pub use sort::{
    BufferPlan, CancellationToken, ExternalSorter, ExternalSorterBuilder, Phase, SortConfig, SortError, SortSummary,
};
pub use split::{ChunkSplitter, SplitOutcome};
pub use window::{Mode, RecordWindow};

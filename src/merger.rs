//! Pairwise run merger.

use std::cmp::Ordering;
use std::io;
use std::path::Path;

use crate::cursor::{RunReader, RunWriter};
use crate::record::Record;
use crate::sort::{Phase, SortError};

/// Window capacities, in records, of one merge task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MergeBudget {
    /// Capacity of each input window.
    pub input_capacity: usize,
    /// Capacity of the output window.
    pub output_capacity: usize,
}

/// Merges two sorted runs into a new sorted run at `output`.
/// Returns the number of records written.
///
/// Runs should be sorted according to `compare`, otherwise the result is undefined. The order of equal records is
/// not specified. The input files are left in place; errors name the file that failed.
pub fn merge_runs<T, F>(
    left: &Path,
    right: &Path,
    output: &Path,
    budget: MergeBudget,
    compare: F,
) -> Result<u64, SortError>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    let mut lhs = RunReader::<T>::open(left, budget.input_capacity).map_err(failed(left))?;
    let mut rhs = RunReader::<T>::open(right, budget.input_capacity).map_err(failed(right))?;
    let mut out = RunWriter::<T>::create(output, budget.output_capacity).map_err(failed(output))?;

    while lhs.is_valid() && rhs.is_valid() {
        let (lhv, rhv) = (lhs.current(), rhs.current());
        if compare(&rhv, &lhv) == Ordering::Less {
            out.push(rhv).map_err(failed(output))?;
            rhs.advance().map_err(failed(right))?;
        } else {
            out.push(lhv).map_err(failed(output))?;
            lhs.advance().map_err(failed(left))?;
        }
    }

    drain(&mut lhs, &mut out)?;
    drain(&mut rhs, &mut out)?;

    let (_, written) = out.finish().map_err(failed(output))?;

    return Ok(written);
}

fn failed(path: &Path) -> impl FnOnce(io::Error) -> SortError + '_ {
    move |err| SortError::io(Phase::Merge, path, err)
}

fn drain<T: Record>(input: &mut RunReader<T>, out: &mut RunWriter<T>) -> Result<(), SortError> {
    while input.is_valid() {
        out.push(input.current())
            .map_err(|err| SortError::io(Phase::Merge, out.path(), err))?;
        input.advance().map_err(|err| SortError::io(Phase::Merge, input.path(), err))?;
    }

    return Ok(());
}

//! File system helpers for run files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile;

const RUN_PREFIX: &str = "run-";
const RUN_SUFFIX: &str = ".bin";

/// Checks that `path` exists and is a regular file.
pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

/// Reserves a unique run file name in `dir`.
///
/// The file is created empty so that concurrent callers never receive the same name; it is not removed
/// automatically.
pub fn unique_run_path(dir: &Path) -> io::Result<PathBuf> {
    tempfile::Builder::new()
        .prefix(RUN_PREFIX)
        .suffix(RUN_SUFFIX)
        .tempfile_in(dir)?
        .into_temp_path()
        .keep()
        .map_err(|err| err.error)
}

/// Creates an empty run in `dir`, used as the result of sorting an empty input.
pub fn create_empty_run(dir: &Path) -> io::Result<PathBuf> {
    unique_run_path(dir)
}

/// Moves `from` to `to`, falling back to copy and remove when a rename is not possible
/// (e.g. across file systems).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(from, to) {
        log::debug!("rename {} failed ({}), copying instead", from.display(), err);
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }

    return Ok(());
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::fs;

    use rstest::*;

    use super::{is_regular_file, move_file, unique_run_path};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_is_regular_file(tmp_dir: tempfile::TempDir) {
        let file = tmp_dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        assert!(is_regular_file(&file));
        assert!(!is_regular_file(tmp_dir.path()));
        assert!(!is_regular_file(&tmp_dir.path().join("missing")));
    }

    #[rstest]
    fn test_unique_run_paths(tmp_dir: tempfile::TempDir) {
        let paths: HashSet<_> = (0..100).map(|_| unique_run_path(tmp_dir.path()).unwrap()).collect();

        assert_eq!(paths.len(), 100);
        for path in &paths {
            assert_eq!(path.parent(), Some(tmp_dir.path()));
            assert_eq!(fs::metadata(path).unwrap().len(), 0);
        }
    }

    #[rstest]
    fn test_move_file(tmp_dir: tempfile::TempDir) {
        let from = tmp_dir.path().join("from");
        let to = tmp_dir.path().join("to");
        fs::write(&from, b"data").unwrap();
        fs::write(&to, b"old").unwrap();

        move_file(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"data");
    }

    #[rstest]
    fn test_unique_run_path_missing_dir(tmp_dir: tempfile::TempDir) {
        assert!(unique_run_path(&tmp_dir.path().join("missing")).is_err());
    }
}

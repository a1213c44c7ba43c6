//! Upward ancestor search shared by the detectors.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::ProjectError;

/// Searches `start_dir` and then each ancestor for an entry called `name`.
///
/// Returns the first match, file or directory, closest to `start_dir`.
/// The walk is lexical (`Path::ancestors`) and capped at the number of path
/// components, so it always terminates at the filesystem root even when the
/// tree contains symlink cycles. NotFound at a level just moves up; any
/// other I/O error is returned.
pub fn find_file_or_directory(
    start_dir: &Path,
    name: &str,
) -> Result<Option<PathBuf>, ProjectError> {
    let max_depth = start_dir.components().count();

    for dir in start_dir.ancestors().take(max_depth) {
        if dir.as_os_str().is_empty() {
            break;
        }
        let candidate = dir.join(name);
        match std::fs::symlink_metadata(&candidate) {
            Ok(_) => return Ok(Some(candidate)),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) if is_not_a_directory(&err) => continue,
            Err(err) => {
                return Err(ProjectError::Io {
                    path: candidate,
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

/// Returns the directory a search should begin from: the path itself when it
/// is a directory, otherwise its parent. Relative paths are anchored at the
/// current working directory.
pub fn search_start(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    if absolute.is_dir() {
        Some(absolute)
    } else {
        absolute.parent().map(Path::to_path_buf)
    }
}

// A path component that is a regular file (e.g. `/repo/main.rs/.git`).
fn is_not_a_directory(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_finds_file_in_ancestor() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("src").join("otherfolder");
        fs::create_dir_all(&dir).unwrap();
        fs::write(temp.path().join(".pulse-project"), "pulse\n").unwrap();

        let found = find_file_or_directory(&dir, ".pulse-project").unwrap();
        assert_eq!(found, Some(temp.path().join(".pulse-project")));
    }

    #[test]
    fn test_finds_directory_in_ancestor() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("src").join("otherfolder");
        fs::create_dir_all(&dir).unwrap();

        let found = find_file_or_directory(&dir, "src").unwrap();
        assert_eq!(found, Some(temp.path().join("src")));
    }

    #[test]
    fn test_closest_match_wins() {
        let temp = tempdir().unwrap();
        let inner = temp.path().join("a").join("b");
        fs::create_dir_all(&inner).unwrap();
        fs::write(temp.path().join("marker"), "").unwrap();
        fs::write(temp.path().join("a").join("marker"), "").unwrap();

        let found = find_file_or_directory(&inner, "marker").unwrap();
        assert_eq!(found, Some(temp.path().join("a").join("marker")));
    }

    #[test]
    fn test_missing_name_returns_none() {
        let temp = tempdir().unwrap();
        let found =
            find_file_or_directory(temp.path(), "definitely-not-a-real-marker-3f9a").unwrap();
        assert_eq!(found, None);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_cycle_terminates() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("loop");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(&dir, dir.join("self")).unwrap();

        let start = dir.join("self").join("self").join("self");
        let found = find_file_or_directory(&start, "definitely-not-a-real-marker-3f9a").unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_search_start_uses_parent_for_files() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("main.rs");
        fs::write(&file, "fn main() {}").unwrap();

        assert_eq!(search_start(&file), Some(temp.path().to_path_buf()));
        assert_eq!(search_start(temp.path()), Some(temp.path().to_path_buf()));
        assert_eq!(
            search_start(&temp.path().join("missing.rs")),
            Some(temp.path().to_path_buf())
        );
    }
}

//! Marker-file project detection.
//!
//! A `.pulse-project` file names the project without any VCS tooling:
//!
//! ```text
//! my-project        <- line 1: project name
//! feature/login     <- line 2 (optional): branch
//! ```
//!
//! The closest marker between the activity path and the filesystem root wins,
//! and the directory holding it becomes the result's folder.

use std::io::ErrorKind;
use std::path::Path;

use super::search::{find_file_or_directory, search_start};
use super::{Detector, ProjectResult, MARKER_FILE_NAME};
use crate::error::ProjectError;

pub struct MarkerFileDetector {
    marker_name: String,
}

impl Default for MarkerFileDetector {
    fn default() -> Self {
        Self::new(MARKER_FILE_NAME)
    }
}

impl MarkerFileDetector {
    pub fn new(marker_name: impl Into<String>) -> Self {
        Self {
            marker_name: marker_name.into(),
        }
    }
}

impl Detector for MarkerFileDetector {
    fn name(&self) -> &'static str {
        "project-file-detector"
    }

    fn detect(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
        let Some(start_dir) = search_start(start) else {
            return Ok(None);
        };

        let Some(marker) = find_file_or_directory(&start_dir, &self.marker_name)? else {
            return Ok(None);
        };

        if marker.is_dir() {
            tracing::debug!(path = %marker.display(), "Ignoring directory named like the project marker");
            return Ok(None);
        }

        let content = match std::fs::read_to_string(&marker) {
            Ok(content) => content,
            // Removed between the search and the read.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ProjectError::Io {
                    path: marker,
                    source: err,
                })
            }
        };

        let Some(folder) = marker.parent().map(Path::to_path_buf) else {
            return Ok(None);
        };

        let mut lines = content.lines().map(str::trim);
        let project = match lines.next().filter(|line| !line.is_empty()) {
            Some(name) => name.to_string(),
            // An empty marker still pins the root; name it after the folder.
            None => match folder.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => return Ok(None),
            },
        };
        let branch = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(str::to_string);

        Ok(Some(ProjectResult {
            project,
            branch,
            folder: Some(folder),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_marker_in_ancestor_sets_project_branch_and_folder() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a");
        let c = a.join("b").join("c");
        fs::create_dir_all(&c).unwrap();
        fs::write(a.join(MARKER_FILE_NAME), "proj-x\nfeature-7").unwrap();

        let result = MarkerFileDetector::default().detect(&c).unwrap().unwrap();
        assert_eq!(
            result,
            ProjectResult {
                project: "proj-x".to_string(),
                branch: Some("feature-7".to_string()),
                folder: Some(a),
            }
        );
    }

    #[test]
    fn test_marker_next_to_file_entity() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("main.rs");
        fs::write(&file, "fn main() {}").unwrap();
        fs::write(temp.path().join(MARKER_FILE_NAME), "pulse\nmaster\n").unwrap();

        let result = MarkerFileDetector::default().detect(&file).unwrap().unwrap();
        assert_eq!(result.project, "pulse");
        assert_eq!(result.branch.as_deref(), Some("master"));
        assert_eq!(result.folder.as_deref(), Some(temp.path()));
    }

    #[test]
    fn test_single_line_marker_has_no_branch() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(MARKER_FILE_NAME), "solo\n\n").unwrap();

        let result = MarkerFileDetector::default()
            .detect(temp.path())
            .unwrap()
            .unwrap();
        assert_eq!(result.project, "solo");
        assert_eq!(result.branch, None);
    }

    #[test]
    fn test_empty_marker_uses_folder_name() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("named-root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(MARKER_FILE_NAME), "").unwrap();

        let result = MarkerFileDetector::default().detect(&root).unwrap().unwrap();
        assert_eq!(result.project, "named-root");
    }

    #[test]
    fn test_no_marker_anywhere_is_not_found() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("non-valid-file");
        fs::write(&file, "").unwrap();

        let detector = MarkerFileDetector::new("pulse-marker-that-does-not-exist-7c1e");
        assert_eq!(detector.detect(&file).unwrap(), None);
    }

    #[test]
    fn test_name() {
        assert_eq!(MarkerFileDetector::default().name(), "project-file-detector");
    }
}

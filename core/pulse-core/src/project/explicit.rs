//! Caller-supplied and last-resort project naming.

use std::path::Path;

use super::search::search_start;
use super::{Detector, ProjectResult};
use crate::error::ProjectError;

/// Uses the project (and branch) the caller passed explicitly.
#[derive(Debug, Default)]
pub struct OverrideDetector {
    project: Option<String>,
    branch: Option<String>,
}

impl OverrideDetector {
    pub fn new(project: Option<String>, branch: Option<String>) -> Self {
        Self {
            project: non_empty(project),
            branch: non_empty(branch),
        }
    }
}

impl Detector for OverrideDetector {
    fn name(&self) -> &'static str {
        "override-detector"
    }

    fn detect(&self, _start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
        Ok(self.project.as_ref().map(|project| ProjectResult {
            project: project.clone(),
            branch: self.branch.clone(),
            folder: None,
        }))
    }
}

/// Names the project after the caller's alternate name, or the leaf directory.
///
/// Never names a project after the filesystem root or the home directory;
/// those would swallow every unrelated file beneath them.
#[derive(Debug, Default)]
pub struct FallbackDetector {
    alternate: Option<String>,
}

impl FallbackDetector {
    pub fn new(alternate: Option<String>) -> Self {
        Self {
            alternate: non_empty(alternate),
        }
    }
}

impl Detector for FallbackDetector {
    fn name(&self) -> &'static str {
        "fallback-detector"
    }

    fn detect(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
        let Some(dir) = search_start(start) else {
            return Ok(None);
        };

        if let Some(alternate) = &self.alternate {
            return Ok(Some(ProjectResult {
                project: alternate.clone(),
                branch: None,
                folder: Some(dir),
            }));
        }

        if dirs::home_dir().is_some_and(|home| home == dir) {
            return Ok(None);
        }

        Ok(dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .map(|project| ProjectResult {
                project,
                branch: None,
                folder: Some(dir.clone()),
            }))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_override_requires_project() {
        let none = OverrideDetector::new(None, Some("main".to_string()));
        assert_eq!(none.detect(Path::new("/x")).unwrap(), None);

        let blank = OverrideDetector::new(Some("   ".to_string()), None);
        assert_eq!(blank.detect(Path::new("/x")).unwrap(), None);

        let set = OverrideDetector::new(Some("billing".to_string()), Some("main".to_string()));
        let result = set.detect(Path::new("/x")).unwrap().unwrap();
        assert_eq!(result.project, "billing");
        assert_eq!(result.branch.as_deref(), Some("main"));
        assert_eq!(result.folder, None);
    }

    #[test]
    fn test_fallback_uses_leaf_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("leafy");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.md"), "").unwrap();

        let result = FallbackDetector::default()
            .detect(&dir.join("notes.md"))
            .unwrap()
            .unwrap();
        assert_eq!(result.project, "leafy");
        assert_eq!(result.branch, None);
        assert_eq!(result.folder, Some(dir));
    }

    #[test]
    fn test_fallback_prefers_alternate_name() {
        let temp = tempdir().unwrap();
        let result = FallbackDetector::new(Some("from-plugin".to_string()))
            .detect(temp.path())
            .unwrap()
            .unwrap();
        assert_eq!(result.project, "from-plugin");
    }

    #[test]
    fn test_fallback_skips_filesystem_root() {
        assert_eq!(FallbackDetector::default().detect(Path::new("/")).unwrap(), None);
    }
}

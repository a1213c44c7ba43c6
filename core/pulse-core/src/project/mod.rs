//! Project context resolution for heartbeats.
//!
//! A [`ProjectResolver`] holds an ordered list of [`Detector`]s and returns
//! the first one that finds context. Results are never merged: a marker file
//! that names a project but no branch does not borrow the branch from git.
//!
//! Default cascade:
//!
//! 1. [`OverrideDetector`]: project passed explicitly by the caller
//! 2. [`GitDetector`]: repository root name and current branch
//! 3. [`MarkerFileDetector`]: nearest `.pulse-project` file
//! 4. [`FallbackDetector`]: alternate name, else the leaf directory
//!
//! New strategies are appended to the list; there is no inheritance.

mod explicit;
mod file;
mod git;
mod search;

pub use explicit::{FallbackDetector, OverrideDetector};
pub use file::MarkerFileDetector;
pub use git::GitDetector;
pub use search::{find_file_or_directory, search_start};

use std::path::{Path, PathBuf};

use crate::error::ProjectError;

/// Conventional marker file naming a project root.
pub const MARKER_FILE_NAME: &str = ".pulse-project";

/// Detected project context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResult {
    pub project: String,
    pub branch: Option<String>,
    /// Directory the context was found in (the resolution anchor).
    pub folder: Option<PathBuf>,
}

/// One project-context detection strategy.
///
/// Implementors should:
/// - Return `Ok(None)` when nothing is found (absence is not an error)
/// - Return `Err` only for I/O failures other than NotFound
/// - Never panic
pub trait Detector {
    /// Identifier used in logs (e.g. "project-file-detector").
    fn name(&self) -> &'static str;

    fn detect(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError>;
}

/// Caller-supplied hints feeding the default cascade.
#[derive(Debug, Clone, Default)]
pub struct ProjectOverrides {
    pub project: Option<String>,
    pub branch: Option<String>,
    pub alternate_project: Option<String>,
}

pub struct ProjectResolver {
    detectors: Vec<Box<dyn Detector>>,
}

impl ProjectResolver {
    pub fn new(overrides: ProjectOverrides) -> Self {
        Self::with_detectors(vec![
            Box::new(OverrideDetector::new(overrides.project, overrides.branch)),
            Box::new(GitDetector),
            Box::new(MarkerFileDetector::default()),
            Box::new(FallbackDetector::new(overrides.alternate_project)),
        ])
    }

    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// Runs the cascade for `start` (a file or directory).
    ///
    /// A detector error halts only that detector: it is logged and the next
    /// one runs. If no detector finds context, the first error (if any) is
    /// returned so the caller can report it; otherwise `Ok(None)`.
    pub fn resolve(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
        let mut first_error = None;

        for detector in &self.detectors {
            match detector.detect(start) {
                Ok(Some(result)) => {
                    tracing::debug!(
                        detector = detector.name(),
                        project = %result.project,
                        branch = ?result.branch,
                        "Project context detected"
                    );
                    return Ok(Some(result));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(detector = detector.name(), error = %err, "Project detector failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::cell::Cell;

    /// Scripted detector for cascade tests.
    pub struct StubDetector {
        pub name: &'static str,
        pub result: Option<ProjectResult>,
        pub fail: bool,
        pub calls: Cell<usize>,
    }

    impl StubDetector {
        pub fn found(name: &'static str, project: &str) -> Self {
            Self {
                name,
                result: Some(ProjectResult {
                    project: project.to_string(),
                    branch: None,
                    folder: None,
                }),
                fail: false,
                calls: Cell::new(0),
            }
        }

        pub fn missing(name: &'static str) -> Self {
            Self {
                name,
                result: None,
                fail: false,
                calls: Cell::new(0),
            }
        }

        pub fn failing(name: &'static str) -> Self {
            Self {
                name,
                result: None,
                fail: true,
                calls: Cell::new(0),
            }
        }
    }

    impl Detector for std::rc::Rc<StubDetector> {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detect(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(ProjectError::Io {
                    path: start.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(self.result.clone())
        }
    }
}

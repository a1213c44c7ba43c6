//! Git-derived project context.
//!
//! Reads just enough of the repository layout to name the project and branch:
//! the `.git` entry (a directory, or a `gitdir:` file for worktrees and
//! submodules), `commondir` for linked worktrees, and `HEAD`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::search::{find_file_or_directory, search_start};
use super::{Detector, ProjectResult};
use crate::error::ProjectError;

const GIT_ENTRY: &str = ".git";
const HEAD_REF_PREFIX: &str = "ref: refs/heads/";

#[derive(Debug, Default)]
pub struct GitDetector;

#[derive(Debug)]
struct GitLayout {
    /// Directory containing the `.git` entry (the checkout being edited).
    worktree_root: PathBuf,
    /// Git dir for this checkout, holding its own `HEAD`.
    git_dir: PathBuf,
    /// Main repository root when `worktree_root` is a linked worktree.
    repo_root: Option<PathBuf>,
}

impl Detector for GitDetector {
    fn name(&self) -> &'static str {
        "git-detector"
    }

    fn detect(&self, start: &Path) -> Result<Option<ProjectResult>, ProjectError> {
        let Some(start_dir) = search_start(start) else {
            return Ok(None);
        };
        let Some(layout) = locate(&start_dir)? else {
            return Ok(None);
        };

        // Worktrees report the main repository's name so activity on any
        // checkout lands on the same project.
        let name_source = layout.repo_root.as_deref().unwrap_or(&layout.worktree_root);
        let Some(project) = name_source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            return Ok(None);
        };

        let branch = read_branch(&layout.git_dir)?;

        Ok(Some(ProjectResult {
            project,
            branch,
            folder: Some(layout.worktree_root),
        }))
    }
}

fn locate(start_dir: &Path) -> Result<Option<GitLayout>, ProjectError> {
    let Some(entry) = find_file_or_directory(start_dir, GIT_ENTRY)? else {
        return Ok(None);
    };
    let Some(worktree_root) = entry.parent().map(Path::to_path_buf) else {
        return Ok(None);
    };

    if entry.is_dir() {
        return Ok(Some(GitLayout {
            worktree_root,
            git_dir: entry,
            repo_root: None,
        }));
    }

    let Some(git_dir) = parse_gitdir(&entry, &worktree_root)? else {
        return Ok(None);
    };
    let repo_root = parse_commondir(&git_dir)?.and_then(|common| common.parent().map(Path::to_path_buf));

    Ok(Some(GitLayout {
        worktree_root,
        git_dir,
        repo_root,
    }))
}

fn parse_gitdir(git_file: &Path, worktree_root: &Path) -> Result<Option<PathBuf>, ProjectError> {
    let Some(contents) = read_optional(git_file)? else {
        return Ok(None);
    };
    let Some(line) = contents
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("gitdir:"))
    else {
        return Ok(None);
    };
    let raw = line.get("gitdir:".len()..).unwrap_or_default().trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(resolve_git_path(worktree_root, raw)))
}

fn parse_commondir(git_dir: &Path) -> Result<Option<PathBuf>, ProjectError> {
    let Some(contents) = read_optional(&git_dir.join("commondir"))? else {
        return Ok(None);
    };
    let raw = contents.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(resolve_git_path(git_dir, raw)))
}

fn read_branch(git_dir: &Path) -> Result<Option<String>, ProjectError> {
    let Some(head) = read_optional(&git_dir.join("HEAD"))? else {
        return Ok(None);
    };
    // Detached HEAD holds a bare commit hash; there is no branch to report.
    Ok(head
        .trim()
        .strip_prefix(HEAD_REF_PREFIX)
        .filter(|name| !name.is_empty())
        .map(str::to_string))
}

fn resolve_git_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

fn read_optional(path: &Path) -> Result<Option<String>, ProjectError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ProjectError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

//! Workspace scoping: every tool path is resolved against one root directory.
//!
//! Paths are normalized lexically first, then the deepest existing ancestor
//! is canonicalized so that a symlink inside the workspace cannot lead out
//! of it.

use std::path::{Component, Path, PathBuf};

/// Error returned when a tool path cannot be resolved inside the workspace.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("absolute paths are not allowed: '{path}'")]
    Absolute { path: String },

    #[error("path '{path}' escapes the workspace")]
    Escapes { path: String },

    #[error("failed to resolve '{path}': {reason}")]
    Io { path: String, reason: String },
}

/// The directory tools operate in.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path to an absolute one inside the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathError> {
        let input = Path::new(relative);
        if input.is_absolute() || input.has_root() {
            return Err(PathError::Absolute {
                path: relative.into(),
            });
        }

        let mut normalized = PathBuf::new();
        for component in input.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(PathError::Escapes {
                            path: relative.into(),
                        });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute {
                        path: relative.into(),
                    });
                }
            }
        }

        let candidate = self.root.join(&normalized);
        self.check_links(&candidate, relative)?;
        Ok(candidate)
    }

    /// Display form of an absolute path inside the workspace.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let display = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if display.is_empty() {
            ".".into()
        } else {
            display
        }
    }

    fn check_links(&self, candidate: &Path, relative: &str) -> Result<(), PathError> {
        let existing = candidate
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(self.root.as_path());
        let canonical = existing.canonicalize().map_err(|e| PathError::Io {
            path: relative.into(),
            reason: e.to_string(),
        })?;
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(PathError::Escapes {
                path: relative.into(),
            })
        }
    }
}

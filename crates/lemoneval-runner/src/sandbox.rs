//! Disposable working directory for one program-test evaluation.

use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use lemoneval_core::error::EvalError;

/// A sandboxed directory holding the staged input, the program's output and
/// the staged solution.
///
/// Call [`Sandbox::close`] to remove it and observe cleanup errors. If the
/// sandbox is dropped instead, the directory is still removed but errors are
/// lost.
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Create an empty sandbox, under `root` if given, else under the system
    /// temp directory.
    pub fn new(root: Option<&Path>) -> Result<Self, EvalError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lemoneval-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    EvalError::sandbox(format!("failed to create {}", root.display()), e)
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| EvalError::sandbox("failed to create sandbox directory", e))?;

        tracing::debug!("created sandbox {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Get the path to the sandbox directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy `src` into the sandbox as `name`.
    pub fn stage_copy(&self, src: &Path, name: &str) -> Result<PathBuf, EvalError> {
        let dest = self.resolve(name)?;
        std::fs::copy(src, &dest).map_err(|e| {
            EvalError::sandbox(format!("failed to stage {} as {name}", src.display()), e)
        })?;
        Ok(dest)
    }

    /// Create an empty file named `name` in the sandbox.
    pub fn reserve(&self, name: &str) -> Result<PathBuf, EvalError> {
        let dest = self.resolve(name)?;
        std::fs::File::create(&dest)
            .map_err(|e| EvalError::sandbox(format!("failed to reserve {name}"), e))?;
        Ok(dest)
    }

    /// Remove the sandbox directory.
    pub fn close(self) -> Result<(), EvalError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            EvalError::sandbox(format!("failed to remove sandbox {}", path.display()), e)
        })?;
        tracing::debug!("removed sandbox {}", path.display());
        Ok(())
    }

    /// Map a relative name to a path inside the sandbox.
    fn resolve(&self, name: &str) -> Result<PathBuf, EvalError> {
        let rel = Path::new(name);
        let inside =
            !name.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !inside {
            return Err(EvalError::sandbox(
                format!("invalid sandbox file name '{name}'"),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "name must be relative and stay inside the sandbox",
                ),
            ));
        }
        Ok(self.dir.path().join(rel))
    }
}

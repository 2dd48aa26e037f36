//! Output writer (C4)
//!
//! Persists per-model and synthesis artefacts to the output directory
//! with deterministic, sanitised filenames and configured permission
//! masks.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::context::RunContext;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, OutputError>;

/// Writes model outputs to a directory tree, applying a configured
/// directory/file permission mask on unix (a no-op elsewhere).
pub struct OutputWriter {
    root: PathBuf,
    dir_mode: Option<u32>,
    file_mode: Option<u32>,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>, dir_mode: Option<u32>, file_mode: Option<u32>) -> Self {
        Self {
            root: root.into(),
            dir_mode,
            file_mode,
        }
    }

    fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|source| OutputError::CreateDir {
                path: self.root.clone(),
                source,
            })?;
            self.apply_dir_permissions(&self.root)?;
        }
        Ok(())
    }

    /// Write a per-model artefact to `<root>/<sanitised model_name>.md`.
    pub fn write_per_model(&self, ctx: &RunContext, model_name: &str, content: &str) -> Result<PathBuf> {
        debug!(correlation_id = %ctx.correlation_id(), model = model_name, "persisting per-model artefact");
        let filename = format!("{}.md", sanitize_filename(model_name));
        self.write(&filename, content)
    }

    /// Write the synthesis artefact to `<root>/<sanitised synthesis_model_name>-synthesis.md`.
    pub fn write_synthesis(&self, ctx: &RunContext, synthesis_model_name: &str, content: &str) -> Result<PathBuf> {
        debug!(correlation_id = %ctx.correlation_id(), model = synthesis_model_name, "persisting synthesis artefact");
        let filename = format!("{}-synthesis.md", sanitize_filename(synthesis_model_name));
        self.write(&filename, content)
    }

    fn write(&self, filename: &str, content: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        let path = self.root.join(filename);
        std::fs::write(&path, content).map_err(|source| OutputError::WriteFile {
            path: path.clone(),
            source,
        })?;
        self.apply_file_permissions(&path)?;
        Ok(path)
    }

    #[cfg(unix)]
    fn apply_dir_permissions(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = self.dir_mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
                OutputError::SetPermissions {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_dir_permissions(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn apply_file_permissions(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = self.file_mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
                OutputError::SetPermissions {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_file_permissions(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Replace `{ /, \, :, *, ?, ", ', <, >, | }` with `-` and spaces with
/// `_`; every other character (including dots and hyphens) is
/// preserved as-is. Idempotent: `sanitize_filename` of an
/// already-sanitised name is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '\'' | '<' | '>' | '|' => '-',
            ' ' => '_',
            other => other,
        })
        .collect()
}

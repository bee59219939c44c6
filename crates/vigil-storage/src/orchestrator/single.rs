//! Single-slot orchestrator
//!
//! Always targets the same file; writers overwrite it, so the file only ever
//! holds the latest value.

use std::collections::HashSet;
use std::path::PathBuf;

use vigil_logging::SharedLogger;

use crate::fs_ext;

pub struct SingleFileOrchestrator {
    file: PathBuf,
    logger: SharedLogger,
}

impl SingleFileOrchestrator {
    pub fn new(file: impl Into<PathBuf>, logger: SharedLogger) -> Self {
        Self {
            file: file.into(),
            logger,
        }
    }

    /// The managed file; its parent directory is created if needed
    pub fn get_writable_file(&self) -> Option<PathBuf> {
        let parent = self.file.parent()?;
        if !parent.exists() && !fs_ext::mkdirs_safe(parent, &self.logger) {
            return None;
        }
        Some(self.file.clone())
    }

    pub fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        if exclude.contains(&self.file) || !fs_ext::exists_safe(&self.file, &self.logger) {
            return None;
        }
        Some(self.file.clone())
    }

    pub fn get_all_files(&self) -> Vec<PathBuf> {
        if fs_ext::exists_safe(&self.file, &self.logger) {
            vec![self.file.clone()]
        } else {
            Vec::new()
        }
    }

    pub fn get_root_dir(&self) -> Option<PathBuf> {
        self.file.parent().map(|p| p.to_path_buf())
    }
}

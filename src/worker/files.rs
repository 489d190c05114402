//! Per-task working files and their cleanup

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ocr::text_output_path;

/// The downloaded image and the engine's text output for one task
///
/// Both files are removed when the guard is dropped, whatever the cycle
/// outcome was. Removal never fails loudly: a missing file is fine and any
/// other error is only logged at debug level.
#[derive(Debug)]
pub struct WorkFiles {
    input: PathBuf,
    output: PathBuf,
}

impl WorkFiles {
    /// Paths for a task's unique working name inside `work_dir`
    pub fn new(work_dir: &Path, internal_file_name: &str) -> Self {
        let input = work_dir.join(internal_file_name);
        let output = text_output_path(&input);
        Self { input, output }
    }

    /// Downloaded image, also used as the engine's output stem
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Text produced by the engine
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Remove both files; safe to call more than once
    pub fn cleanup(&self) {
        remove_quietly(&self.input);
        remove_quietly(&self.output);
    }
}

impl Drop for WorkFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed working file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove working file"),
    }
}

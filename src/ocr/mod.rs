//! External OCR engine invocation

pub mod tesseract;

pub use tesseract::TesseractEngine;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to start OCR engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for OCR engine: {0}")]
    Wait(#[from] io::Error),

    #[error("OCR engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("OCR engine interrupted by shutdown")]
    Cancelled,
}

impl OcrError {
    /// The engine cannot be started at all and never will be
    pub fn is_fatal(&self) -> bool {
        match self {
            OcrError::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// Outcome of one engine run; a non-zero exit is a result, not an error
#[derive(Debug, Clone)]
pub struct OcrRun {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
    pub elapsed: Duration,
}

impl OcrRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Error text reported to the server for a failed run
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("OCR engine exited with code {}", code),
            None => "OCR engine terminated by signal".to_string(),
        }
    }
}

/// Text recognition engine consuming an image file
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise `input`, writing text next to `output_stem`
    async fn recognize(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output_stem: &Path,
    ) -> Result<OcrRun, OcrError>;

    /// File the recognised text ends up in
    fn output_path(&self, output_stem: &Path) -> PathBuf {
        text_output_path(output_stem)
    }
}

/// `<stem>.txt`, appended rather than replacing any extension
pub fn text_output_path(output_stem: &Path) -> PathBuf {
    let mut path = output_stem.as_os_str().to_owned();
    path.push(".txt");
    PathBuf::from(path)
}

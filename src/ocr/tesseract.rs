use async_trait::async_trait;
use chrono::Local;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{OcrEngine, OcrError, OcrRun};
use crate::config::OcrConfig;

/// Tesseract CLI run as a subprocess:
/// `tesseract <input> <stem> -l <lang> --psm <mode> --dpi <dpi>`
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: String,
    language: String,
    page_segmentation_mode: u8,
    dpi: u32,
    timeout: Option<Duration>,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            language: config.language.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
            dpi: config.dpi,
            timeout: config.timeout.filter(|t| !t.is_zero()).map(|t| t.as_duration()),
        }
    }

    pub fn args(&self, input: &Path, output_stem: &Path) -> Vec<OsString> {
        vec![
            input.as_os_str().to_owned(),
            output_stem.as_os_str().to_owned(),
            "-l".into(),
            self.language.clone().into(),
            "--psm".into(),
            self.page_segmentation_mode.to_string().into(),
            "--dpi".into(),
            self.dpi.to_string().into(),
        ]
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output_stem: &Path,
    ) -> Result<OcrRun, OcrError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(input, output_stem));
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Local::now();
        let clock = Instant::now();
        info!(program = %self.program, input = %input.display(), "OCR engine started");

        let child = cmd.spawn().map_err(|source| OcrError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future kills the child
        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OcrError::Cancelled),
                result = tokio::time::timeout(limit, wait) => {
                    result.map_err(|_| OcrError::Timeout(limit))??
                }
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OcrError::Cancelled),
                result = wait => result?,
            },
        };

        let elapsed = clock.elapsed();
        let run = OcrRun {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            started,
            ended: Local::now(),
            elapsed,
        };

        debug!(
            exit_code = ?run.exit_code,
            elapsed_secs = elapsed.as_secs_f64(),
            "OCR engine finished"
        );

        Ok(run)
    }
}

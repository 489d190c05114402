//! Wire schema of the queue server

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Task id of the always-available practice task
pub const DEMO_TASK_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Content type of every page the minion processes
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Tool identifier reported back to the server
pub const USED_TOOL: &str = "Tesseract";

/// A unit of OCR work handed out by `gettask.ashx`
///
/// ```json
/// {"TaskId":"00000000-0000-0000-0000-000000000000","Priority":5,"Intensity":0,
///  "OrigFilename":"testfile.jpg","localTempFile":null}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub intensity: i32,
    #[serde(rename = "OrigFilename", alias = "OrigFileName", default)]
    pub orig_filename: String,
    #[serde(alias = "localTempFile", default)]
    pub local_temp_file: Option<String>,
    /// Unique local working name, never sent to the server
    #[serde(skip, default = "new_internal_file_name")]
    pub internal_file_name: String,
}

fn new_internal_file_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Task {
    /// Task the server answered with an empty body
    pub fn unassigned() -> Self {
        Self {
            task_id: None,
            priority: 0,
            intensity: 0,
            orig_filename: String::new(),
            local_temp_file: None,
            internal_file_name: new_internal_file_name(),
        }
    }

    /// Decode a `gettask.ashx` body; blank or `null` bodies yield a task without id
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::unassigned());
        }
        serde_json::from_str(trimmed)
    }

    /// Non-blank task id, if the server assigned one
    pub fn id(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn is_demo(&self) -> bool {
        self.id() == Some(DEMO_TASK_ID)
    }
}

/// Error body returned with 420/401/403
///
/// ```json
/// {"error":"empty queue","nextRequestInSec":10}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    #[serde(alias = "Error", default)]
    pub error: Option<String>,
    #[serde(rename = "nextRequestInSec", alias = "NextRequestInSec", default)]
    pub next_request_in_sec: Option<i64>,
}

impl ErrorResult {
    /// Parse an error body, `None` if it isn't the expected JSON
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body.trim()).ok()
    }

    /// Server-suggested wait, negative values clamped to zero
    pub fn delay(&self) -> Option<Duration> {
        self.next_request_in_sec
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
    }
}

/// One recognised page inside a [`DocumentReport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageResult {
    pub content_type: String,
    pub filename: String,
    pub text: Option<String>,
    /// The engine rarely reports one; 0.0 when unknown
    pub confidence: f32,
    #[serde(rename = "UsedOCR")]
    pub used_ocr: bool,
    /// Multi-page accounting is not supported by the format yet
    pub pages: u32,
    /// Elapsed processing seconds as a numeric string
    pub remains_in_sec: String,
    pub used_tool: String,
    pub server: Option<String>,
}

impl PageResult {
    fn new(filename: &str, text: Option<String>, elapsed: Duration) -> Self {
        Self {
            content_type: IMAGE_CONTENT_TYPE.to_string(),
            filename: filename.to_string(),
            text,
            confidence: 0.0,
            used_ocr: true,
            pages: 0,
            remains_in_sec: elapsed_seconds(elapsed),
            used_tool: USED_TOOL.to_string(),
            server: None,
        }
    }
}

/// Result (or failure) of one task, posted to `donetask.ashx`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentReport {
    pub id: String,
    pub documents: Vec<PageResult>,
    pub server: Option<String>,
    pub started: DateTime<Local>,
    pub ends: DateTime<Local>,
    /// 1 on success, 0 on failure
    pub is_valid: u8,
    pub error: Option<String>,
}

impl DocumentReport {
    pub fn success(
        task_id: &str,
        started: DateTime<Local>,
        ends: DateTime<Local>,
        filename: &str,
        text: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: task_id.to_string(),
            documents: vec![PageResult::new(filename, Some(text), elapsed)],
            server: None,
            started,
            ends,
            is_valid: 1,
            error: None,
        }
    }

    pub fn failure(
        task_id: &str,
        started: DateTime<Local>,
        ends: DateTime<Local>,
        filename: &str,
        error: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: task_id.to_string(),
            documents: vec![PageResult::new(filename, None, elapsed)],
            server: None,
            started,
            ends,
            is_valid: 0,
            error: Some(error),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid == 1
    }

    /// Write the reporting worker into the report and its first page
    ///
    /// Returns `false` when the report has no page to stamp.
    pub fn stamp_server(&mut self, server: &str) -> bool {
        match self.documents.first_mut() {
            Some(page) => {
                page.server = Some(server.to_string());
                self.server = Some(server.to_string());
                true
            }
            None => false,
        }
    }
}

fn elapsed_seconds(elapsed: Duration) -> String {
    elapsed.as_secs_f64().to_string()
}

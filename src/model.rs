use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;

pub const PACKAGE_SCHEME: &str = "pypi:///";
pub const MODEL_SCHEME: &str = "huggingface:///";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub kind: OperationKind,
    pub path: PathBuf,
    pub relative_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
}

impl Phase {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DownloadKind {
    Git,
    Model,
    Package,
    File,
}

impl DownloadKind {
    pub fn label(self) -> &'static str {
        match self {
            DownloadKind::Git => "git clone",
            DownloadKind::Model => "HuggingFace model",
            DownloadKind::Package => "pip install",
            DownloadKind::File => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub url: String,
    pub success: bool,
}

impl Download {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: true,
        }
    }

    pub fn kind(&self) -> DownloadKind {
        let url = self.url.as_str();
        if url.starts_with(PACKAGE_SCHEME) {
            DownloadKind::Package
        } else if url.starts_with(MODEL_SCHEME) || url.contains("huggingface.co/") {
            DownloadKind::Model
        } else if url.starts_with("git@") || url.ends_with(".git") || url.contains("github.com/")
        {
            DownloadKind::Git
        } else {
            DownloadKind::File
        }
    }

    /// URL with the pseudo-scheme of package and model fetches removed.
    pub fn display_url(&self) -> &str {
        self.url
            .strip_prefix(PACKAGE_SCHEME)
            .or_else(|| self.url.strip_prefix(MODEL_SCHEME))
            .unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedFile {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub total_bytes_added: u64,
    pub total_bytes_modified: u64,
    pub by_directory: BTreeMap<String, u64>,
    pub largest_files: Vec<SizedFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedFiles {
    pub total: usize,
    pub largest: Vec<SizedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub command: String,
    pub input_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_characters: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_duration_seconds: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_ms: f64,
    pub exit_code: i32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_time_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub platform: String,
    pub arch: String,
    pub tool_version: String,
    pub cwd: String,
}

impl Environment {
    pub fn current(cwd: impl Into<String>) -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: crate::version::VALUE.to_string(),
            cwd: cwd.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub command: String,
    pub setup_command: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub success: bool,
    pub fresh_run: bool,
    pub phases: Vec<Phase>,
    /// Raw operation log. Kept in memory for the run only; the structured
    /// artifact carries `files_created` instead.
    #[serde(skip)]
    pub file_operations: Vec<FileOperation>,
    pub downloads: Vec<Download>,
    pub errors: Vec<ErrorRecord>,
    pub storage: StorageMetrics,
    #[serde(default)]
    pub files_created: CreatedFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run: Option<TestRunResult>,
    pub environment: Environment,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub name: String,
    pub path: PathBuf,
    pub command: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub success: bool,
    pub duration_ms: u64,
    pub storage_added: u64,
    pub has_test_run: bool,
}

impl ReportSummary {
    pub fn from_report(name: impl Into<String>, path: impl Into<PathBuf>, report: &Report) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            command: report.command.clone(),
            started_at: report.started_at,
            success: report.success,
            duration_ms: report.duration_ms,
            storage_added: report.storage.total_bytes_added,
            has_test_run: report.test_run.is_some(),
        }
    }
}

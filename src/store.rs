use crate::model::{Report, ReportSummary};
use crate::report;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9-]").expect("valid regex"));
static DASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report not found: {0}")]
    NotFound(String),
    #[error("multiple reports match '{name}': {}", .candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("report {} is not valid: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `<name>.json` and `<name>.md`.
    pub fn save(&self, report: &Report, name: &str) -> Result<SavedPaths, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            context: "create reports directory",
            path: self.dir.clone(),
            source,
        })?;

        let json = self.dir.join(format!("{name}.json"));
        let markdown = self.dir.join(format!("{name}.md"));

        let body = serde_json::to_string_pretty(report).map_err(|source| StoreError::Malformed {
            path: json.clone(),
            source,
        })?;

        fs::write(&json, body).map_err(|source| StoreError::Io {
            context: "write report",
            path: json.clone(),
            source,
        })?;
        fs::write(&markdown, report::render(report)).map_err(|source| StoreError::Io {
            context: "write report",
            path: markdown.clone(),
            source,
        })?;

        tracing::info!(json = %json.display(), "report saved");
        Ok(SavedPaths { json, markdown })
    }

    /// All readable reports, newest first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<ReportSummary>, StoreError> {
        let mut summaries = Vec::new();

        for path in self.json_files()? {
            let report = match read_report(&path) {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable report");
                    continue;
                }
            };
            summaries.push(ReportSummary::from_report(stem(&path), path, &report));
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Finds the structured file for `name`: exact `<name>.json` first, then a
    /// case-insensitive substring match that must be unique.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let exact = self.dir.join(format!("{name}.json"));
        if exact.is_file() {
            return Ok(exact);
        }

        let needle = name.to_lowercase();
        let mut matches: Vec<PathBuf> = self
            .json_files()?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .map(|f| f.to_string_lossy().to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect();

        match matches.len() {
            0 => Err(StoreError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(StoreError::Ambiguous {
                name: name.to_string(),
                candidates: matches.iter().map(|path| stem(path)).collect(),
            }),
        }
    }

    pub fn load(&self, name: &str) -> Result<(PathBuf, Report), StoreError> {
        let path = self.resolve(name)?;
        let report = read_report(&path)?;
        Ok((path, report))
    }

    fn json_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    context: "read reports directory",
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// The rendered document that sits next to a structured report.
pub fn rendered_path(json_path: &Path) -> PathBuf {
    json_path.with_extension("md")
}

/// `<slug>[-<input stem>]-<YYYY-MM-DDTHH-MM-SS>` in UTC.
pub fn report_name(command: &str, input: Option<&str>, at: OffsetDateTime) -> String {
    let mut name = sanitize(command);

    if let Some(input) = input {
        let input_stem = Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "custom".to_string());
        name.push('-');
        name.push_str(&sanitize(&input_stem));
    }

    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(&format_description!(
            "[year]-[month]-[day]T[hour]-[minute]-[second]"
        ))
        .unwrap_or_else(|_| "unknown-time".to_string());

    format!("{name}-{stamp}")
}

/// Replaces every character outside `[A-Za-z0-9-]` with `-` and collapses
/// runs of dashes.
pub fn sanitize(text: &str) -> String {
    let replaced = UNSAFE_CHARS_RE.replace_all(text, "-");
    DASH_RUN_RE.replace_all(&replaced, "-").into_owned()
}

fn read_report(path: &Path) -> Result<Report, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        context: "read report",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

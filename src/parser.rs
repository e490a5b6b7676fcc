//! Incremental extraction of phases, downloads, and errors from command output.
//!
//! Lines are fed one at a time while the observed command runs. Phase tracking
//! is a two-state machine (idle / in-phase) driven by timestamped log lines of
//! the form `[HH:MM:SS.mmm] message`. Download and error detection are
//! stateless per line and table-driven.

use crate::model::{Download, ErrorRecord, MODEL_SCHEME, PACKAGE_SCHEME, Phase};
use crate::runner::Stream;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;
use time::OffsetDateTime;

pub const BUFFER_LINES: usize = 20;
pub const CONTEXT_LINES: usize = 5;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

static TIMESTAMPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}):(\d{2}):(\d{2})\.(\d{3})\]\s*(.+)$").expect("valid regex")
});
static COMPLETION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)completed|success|done|finished|installed").expect("valid regex")
});
static FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)fail|error").expect("valid regex"));
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(installing|cloning|downloading|building|compiling|creating|setting up|updating|checking)",
    )
    .expect("valid regex")
});
static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|fail|exception").expect("valid regex"));
static WARNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)warning").expect("valid regex"));

static GIT_CLONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgit\s+clone\s+(.+)").expect("valid regex"));
static FETCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:wget|curl)\s+.*?(https?://[^\s'"]+)"#).expect("valid regex")
});
static PIP_INSTALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpip3?\s+install\s+([^;&|]+)").expect("valid regex"));
static DOWNLOADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDownloading\s+(https?://\S+)").expect("valid regex"));
static HF_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(https?://huggingface\.co/[^\s'"]+)"#).expect("valid regex")
});
static HUB_CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)huggingface_hub|from_pretrained|snapshot_download|huggingface-cli\s+download|\bhf\s+download",
    )
    .expect("valid regex")
});
static HUB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][\w-]*/[\w][\w.-]*$").expect("valid regex"));

/// pip flags whose next token is a value rather than a package.
const PIP_VALUE_FLAGS: &[&str] = &[
    "-r",
    "--requirement",
    "-c",
    "--constraint",
    "-e",
    "--editable",
    "-i",
    "--index-url",
    "--extra-index-url",
    "-f",
    "--find-links",
    "-t",
    "--target",
];

type Extract = fn(&regex::Captures<'_>, &str) -> Vec<String>;

struct DownloadRule {
    name: &'static str,
    pattern: &'static LazyLock<Regex>,
    extract: Extract,
}

/// Ordered download rules. Every rule runs on every line; a line may yield
/// several downloads.
static DOWNLOAD_RULES: &[DownloadRule] = &[
    DownloadRule {
        name: "git clone",
        pattern: &GIT_CLONE_RE,
        extract: git_clone_target,
    },
    DownloadRule {
        name: "wget/curl",
        pattern: &FETCH_RE,
        extract: first_group,
    },
    DownloadRule {
        name: "pip install",
        pattern: &PIP_INSTALL_RE,
        extract: pip_packages,
    },
    DownloadRule {
        name: "downloading",
        pattern: &DOWNLOADING_RE,
        extract: first_group,
    },
    DownloadRule {
        name: "huggingface url",
        pattern: &HF_URL_RE,
        extract: first_group,
    },
    DownloadRule {
        name: "model hub",
        pattern: &HUB_CONTEXT_RE,
        extract: hub_identifiers,
    },
];

#[derive(Debug, Clone)]
struct OpenPhase {
    phase: Phase,
    log_ms: i64,
}

#[derive(Debug, Default)]
pub struct LogParser {
    open: Option<OpenPhase>,
    buffer: VecDeque<String>,
    phases: Vec<Phase>,
    downloads: Vec<Download>,
    errors: Vec<ErrorRecord>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, line: &str, stream: Stream) {
        self.parse_line_at(line, stream, OffsetDateTime::now_utc());
    }

    /// Same as [`parse_line`](Self::parse_line) with an explicit wall clock.
    pub fn parse_line_at(&mut self, line: &str, stream: Stream, now: OffsetDateTime) {
        if self.buffer.len() == BUFFER_LINES {
            self.buffer.pop_front();
        }
        self.buffer.push_back(line.to_string());

        self.detect_error(line, stream, now);
        self.detect_phase(line, now);
        self.detect_downloads(line);
    }

    fn detect_error(&mut self, line: &str, stream: Stream, now: OffsetDateTime) {
        let message = line.trim();
        if message.is_empty() {
            return;
        }

        let suspicious = stream.is_stderr() || ERROR_RE.is_match(line);
        if !suspicious || WARNING_RE.is_match(line) {
            return;
        }

        let skip = self.buffer.len().saturating_sub(CONTEXT_LINES);
        let context = self
            .buffer
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        self.errors.push(ErrorRecord {
            timestamp: now,
            message: message.to_string(),
            context,
        });
    }

    fn detect_phase(&mut self, line: &str, now: OffsetDateTime) {
        let Some((log_ms, message)) = split_timestamp(line) else {
            return;
        };

        if COMPLETION_RE.is_match(message) {
            if self.open.is_some() {
                let success = !FAILURE_RE.is_match(message);
                self.close_at(log_ms, success);
            }
            return;
        }

        if ACTION_RE.is_match(message) {
            if self.open.is_some() {
                self.close_at(log_ms, true);
            }

            let name = message
                .trim_end()
                .trim_end_matches("...")
                .trim_end_matches('…')
                .trim()
                .to_string();

            self.open = Some(OpenPhase {
                phase: Phase {
                    name,
                    started_at: now,
                    ended_at: None,
                    duration_ms: None,
                    success: true,
                },
                log_ms,
            });
        }
    }

    /// Closes the open phase using the log clock of the closing line.
    fn close_at(&mut self, log_ms: i64, success: bool) {
        let Some(open) = self.open.take() else {
            return;
        };

        let elapsed = (log_ms - open.log_ms).rem_euclid(DAY_MS) as u64;
        let mut phase = open.phase;
        phase.ended_at = Some(phase.started_at + Duration::from_millis(elapsed));
        phase.duration_ms = Some(elapsed);
        phase.success = success;
        self.phases.push(phase);
    }

    fn detect_downloads(&mut self, line: &str) {
        for rule in DOWNLOAD_RULES {
            let Some(caps) = rule.pattern.captures(line) else {
                continue;
            };
            for url in (rule.extract)(&caps, line) {
                tracing::debug!(rule = rule.name, %url, "download detected");
                self.downloads.push(Download::new(url));
            }
        }
    }

    /// Closes a phase left open at end of stream. The owning process has
    /// exited, so the phase counts as successful.
    pub fn finalize(&mut self) {
        self.finalize_at(OffsetDateTime::now_utc());
    }

    pub fn finalize_at(&mut self, now: OffsetDateTime) {
        let Some(open) = self.open.take() else {
            return;
        };

        let mut phase = open.phase;
        let elapsed = (now - phase.started_at).whole_milliseconds().max(0) as u64;
        phase.ended_at = Some(now.max(phase.started_at));
        phase.duration_ms = Some(elapsed);
        self.phases.push(phase);
    }

    pub fn open_phase(&self) -> Option<&Phase> {
        self.open.as_ref().map(|open| &open.phase)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn downloads(&self) -> Vec<Download> {
        dedupe_downloads(&self.downloads)
    }

    pub fn raw_downloads(&self) -> &[Download] {
        &self.downloads
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }
}

/// Unique by URL, first-seen order preserved.
pub fn dedupe_downloads(downloads: &[Download]) -> Vec<Download> {
    let mut seen = HashSet::new();
    downloads
        .iter()
        .filter(|d| seen.insert(d.url.as_str()))
        .cloned()
        .collect()
}

/// Milliseconds since midnight and the message of a `[HH:MM:SS.mmm] message`
/// line.
fn split_timestamp(line: &str) -> Option<(i64, &str)> {
    let caps = TIMESTAMPED_RE.captures(line)?;
    let field = |i: usize| -> Option<i64> { caps.get(i)?.as_str().parse().ok() };

    let (h, m, s, ms) = (field(1)?, field(2)?, field(3)?, field(4)?);
    if h > 23 || m > 59 || s > 59 {
        return None;
    }

    let message = caps.get(5)?.as_str();
    Some((((h * 60 + m) * 60 + s) * 1000 + ms, message))
}

fn first_group(caps: &regex::Captures<'_>, _line: &str) -> Vec<String> {
    caps.get(1)
        .map(|m| vec![m.as_str().to_string()])
        .unwrap_or_default()
}

fn git_clone_target(caps: &regex::Captures<'_>, _line: &str) -> Vec<String> {
    let Some(rest) = caps.get(1) else {
        return Vec::new();
    };

    let tokens: Vec<&str> = rest
        .as_str()
        .split_whitespace()
        .map(strip_quotes)
        .filter(|t| !t.is_empty())
        .collect();

    let remote = tokens
        .iter()
        .find(|t| t.contains("://") || t.starts_with("git@"))
        .or_else(|| tokens.iter().find(|t| !t.starts_with('-')));

    remote.map(|t| vec![t.to_string()]).unwrap_or_default()
}

fn pip_packages(caps: &regex::Captures<'_>, _line: &str) -> Vec<String> {
    let Some(args) = caps.get(1) else {
        return Vec::new();
    };

    let mut packages = Vec::new();
    let mut skip_value = false;

    for token in args.as_str().split_whitespace() {
        if skip_value {
            skip_value = false;
            continue;
        }

        if token.starts_with('-') {
            skip_value = !token.contains('=') && PIP_VALUE_FLAGS.contains(&token);
            continue;
        }

        let token = strip_quotes(token);
        if token.starts_with('.') || token.starts_with('/') || token.contains("://") {
            continue;
        }

        let name = token
            .split(['<', '>', '=', '!', '~', ';', '[', '@'])
            .next()
            .unwrap_or_default()
            .trim();

        if !name.is_empty() {
            packages.push(format!("{PACKAGE_SCHEME}{name}"));
        }
    }

    packages
}

fn hub_identifiers(_caps: &regex::Captures<'_>, line: &str) -> Vec<String> {
    line.split(|c: char| c.is_whitespace() || "\"'`(),=[]".contains(c))
        .filter(|token| !token.contains("://"))
        .map(|token| token.trim_end_matches(':'))
        .filter(|token| HUB_ID_RE.is_match(token))
        .map(|id| format!("{MODEL_SCHEME}{id}"))
        .collect()
}

fn strip_quotes(token: &str) -> &str {
    token.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

use crate::model::{
    CreatedFiles, Download, Environment, ErrorRecord, FileOperation,
    OperationKind, Phase, Report, SizedFile, StorageMetrics, TestRunResult,
};
use crate::output::{format_bytes, format_duration_ms};
use crate::parser::dedupe_downloads;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

pub const FILES_CREATED_LIMIT: usize = 20;
const STDOUT_HEAD_TAIL: usize = 100;
const TEST_STDOUT_HEAD_TAIL: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("phase {0:?} has no end time; finalize the parser before building")]
    OpenPhase(String),
}

/// Everything observed during one run, before aggregation.
///
/// `started_at` and `ended_at` are wall-clock stamps for display;
/// `duration_ms` comes from a monotonic clock and may disagree with them if
/// the system clock was stepped during the run.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub command: String,
    pub setup_command: String,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub fresh_run: bool,
    pub phases: Vec<Phase>,
    pub file_operations: Vec<FileOperation>,
    pub downloads: Vec<Download>,
    pub errors: Vec<ErrorRecord>,
    pub storage: StorageMetrics,
    pub test_run: Option<TestRunResult>,
    pub environment: Environment,
    pub stdout: String,
    pub stderr: String,
}

pub fn build(inputs: ReportInputs) -> Result<Report, ReportError> {
    if let Some(open) = inputs.phases.iter().find(|phase| phase.is_open()) {
        return Err(ReportError::OpenPhase(open.name.clone()));
    }

    let files_created = created_files(&inputs.file_operations);

    Ok(Report {
        command: inputs.command,
        setup_command: inputs.setup_command,
        started_at: inputs.started_at,
        ended_at: inputs.ended_at,
        duration_ms: inputs.duration_ms,
        exit_code: inputs.exit_code,
        success: inputs.exit_code == 0,
        fresh_run: inputs.fresh_run,
        phases: inputs.phases,
        file_operations: inputs.file_operations,
        downloads: dedupe_downloads(&inputs.downloads),
        errors: inputs.errors,
        storage: inputs.storage,
        files_created,
        test_run: inputs.test_run,
        environment: inputs.environment,
        stdout: inputs.stdout,
        stderr: inputs.stderr,
    })
}

fn created_files(operations: &[FileOperation]) -> CreatedFiles {
    let mut created: Vec<SizedFile> = operations
        .iter()
        .filter(|op| op.kind == OperationKind::Created && op.size > 0)
        .map(|op| SizedFile {
            path: op.relative_path.clone(),
            size: op.size,
        })
        .collect();

    let total = created.len();
    created.sort_by(|a, b| b.size.cmp(&a.size));
    created.truncate(FILES_CREATED_LIMIT);

    CreatedFiles {
        total,
        largest: created,
    }
}

/// Renders the report as a Markdown document. Depends only on persisted
/// fields, so a reloaded report renders identically.
pub fn render(report: &Report) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# Setup Report: {}", report.command));
    lines.push(String::new());
    lines.push(format!("**Date:** {}", format_datetime(report.started_at)));
    lines.push(format!(
        "**Duration:** {}",
        format_duration_ms(report.duration_ms as f64)
    ));
    lines.push(format!("**Status:** {}", status_word(report.success)));
    lines.push(format!("**Exit Code:** {}", report.exit_code));
    lines.push(format!(
        "**Fresh Run:** {}",
        if report.fresh_run {
            "Yes (markers removed)"
        } else {
            "No"
        }
    ));
    if report.setup_command != report.command {
        lines.push(format!("**Command:** `{}`", report.setup_command));
    }
    lines.push(String::new());

    let env = &report.environment;
    lines.push("## Environment".to_string());
    lines.push(String::new());
    lines.push(format!("- **Platform:** {}", env.platform));
    lines.push(format!("- **Architecture:** {}", env.arch));
    lines.push(format!("- **Tool Version:** {}", env.tool_version));
    lines.push(format!("- **Working Directory:** {}", env.cwd));
    lines.push(String::new());

    if !report.phases.is_empty() {
        lines.push("## Timeline".to_string());
        lines.push(String::new());
        lines.push("| Time | Phase | Duration | Status |".to_string());
        lines.push("|------|-------|----------|--------|".to_string());
        for phase in &report.phases {
            let duration = phase
                .duration_ms
                .filter(|ms| *ms > 0)
                .map(|ms| format_duration_ms(ms as f64))
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "| {} | {} | {} | {} |",
                format_time(phase.started_at),
                phase.name,
                duration,
                if phase.success { "OK" } else { "FAIL" }
            ));
        }
        lines.push(String::new());
    }

    render_storage(&mut lines, &report.storage);
    render_downloads(&mut lines, &report.downloads);
    render_created(&mut lines, &report.files_created);
    render_errors(&mut lines, &report.errors);

    if let Some(test) = &report.test_run {
        render_test_run(&mut lines, test);
    }

    lines.push("## Raw Output".to_string());
    lines.push(String::new());
    push_details(
        &mut lines,
        "stdout (click to expand)",
        &truncate_middle(&report.stdout, STDOUT_HEAD_TAIL, STDOUT_HEAD_TAIL),
    );
    if !report.stderr.trim().is_empty() {
        push_details(
            &mut lines,
            "stderr (click to expand)",
            &truncate_middle(&report.stderr, STDOUT_HEAD_TAIL, STDOUT_HEAD_TAIL),
        );
    }

    lines.join("\n")
}

fn render_storage(lines: &mut Vec<String>, storage: &StorageMetrics) {
    lines.push("## Storage Summary".to_string());
    lines.push(String::new());
    lines.push(format!(
        "**Total Storage Added:** {}",
        format_bytes(storage.total_bytes_added)
    ));
    if storage.total_bytes_modified > 0 {
        lines.push(format!(
            "**Total Storage Modified:** {}",
            format_bytes(storage.total_bytes_modified)
        ));
    }
    lines.push(String::new());

    let mut dirs: Vec<(&String, &u64)> = storage
        .by_directory
        .iter()
        .filter(|(_, size)| **size > 0)
        .collect();
    if !dirs.is_empty() {
        dirs.sort_by(|a, b| b.1.cmp(a.1));
        lines.push("### By Directory".to_string());
        lines.push(String::new());
        lines.push("| Directory | Size Added |".to_string());
        lines.push("|-----------|------------|".to_string());
        for (dir, size) in dirs {
            lines.push(format!("| {dir} | {} |", format_bytes(*size)));
        }
        lines.push(String::new());
    }

    if !storage.largest_files.is_empty() {
        lines.push("### Largest Files".to_string());
        lines.push(String::new());
        push_file_table(lines, &storage.largest_files);
        lines.push(String::new());
    }
}

fn render_downloads(lines: &mut Vec<String>, downloads: &[Download]) {
    if downloads.is_empty() {
        return;
    }

    let mut grouped: Vec<&Download> = downloads.iter().collect();
    grouped.sort_by_key(|d| d.kind());

    lines.push("## Downloads & Sources".to_string());
    lines.push(String::new());
    lines.push("| Source | Type |".to_string());
    lines.push("|--------|------|".to_string());
    for download in grouped {
        lines.push(format!(
            "| {} | {} |",
            download.display_url(),
            download.kind().label()
        ));
    }
    lines.push(String::new());
}

fn render_created(lines: &mut Vec<String>, created: &CreatedFiles) {
    if created.total == 0 {
        return;
    }

    lines.push("## Files Created".to_string());
    lines.push(String::new());
    lines.push(format!("Total: {} files", created.total));
    lines.push(String::new());
    push_file_table(lines, &created.largest);
    if created.total > created.largest.len() {
        lines.push(format!(
            "| ... and {} more files | |",
            created.total - created.largest.len()
        ));
    }
    lines.push(String::new());
}

fn render_errors(lines: &mut Vec<String>, errors: &[ErrorRecord]) {
    lines.push("## Errors".to_string());
    lines.push(String::new());

    if errors.is_empty() {
        lines.push("No errors detected.".to_string());
        lines.push(String::new());
        return;
    }

    for error in errors {
        lines.push(format!("### {}", format_time(error.timestamp)));
        lines.push(String::new());
        push_fenced(lines, &error.message);
        if !error.context.is_empty() {
            lines.push(String::new());
            push_details(lines, "Context", &error.context);
        } else {
            lines.push(String::new());
        }
    }
}

fn render_test_run(lines: &mut Vec<String>, test: &TestRunResult) {
    lines.push("## Test Run Results".to_string());
    lines.push(String::new());
    lines.push(format!("**Command:** `{}`", test.command));
    lines.push(format!("**Status:** {}", status_word(test.success)));
    lines.push(format!(
        "**Generation Time:** {}",
        format_duration_ms(test.duration_ms)
    ));
    lines.push(String::new());

    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    lines.push("### Input".to_string());
    lines.push(String::new());
    lines.push("| Metric | Value |".to_string());
    lines.push("|--------|-------|".to_string());
    lines.push(format!("| File | {} |", test.input_file));
    lines.push(format!("| Size | {} |", or_dash(test.input_size.map(format_bytes))));
    lines.push(format!(
        "| Characters | {} |",
        or_dash(test.input_characters.map(group_thousands))
    ));
    lines.push(format!(
        "| Words | {} |",
        or_dash(test.input_words.map(group_thousands))
    ));
    lines.push(String::new());

    if let Some(output) = &test.output_file {
        lines.push("### Output".to_string());
        lines.push(String::new());
        lines.push("| Metric | Value |".to_string());
        lines.push("|--------|-------|".to_string());
        lines.push(format!("| File | {output} |"));
        if let Some(size) = test.output_size.filter(|s| *s > 0) {
            lines.push(format!("| Size | {} |", format_bytes(size)));
        }
        if let Some(seconds) = test.output_duration_seconds {
            lines.push(format!("| Audio Duration | {seconds:.2}s |"));
        }
        lines.push(String::new());
    }

    lines.push("### Performance Metrics".to_string());
    lines.push(String::new());
    lines.push("| Metric | Value |".to_string());
    lines.push("|--------|-------|".to_string());
    lines.push(format!(
        "| Generation Time | {} |",
        format_duration_ms(test.duration_ms)
    ));
    if let Some(cps) = test.characters_per_second {
        lines.push(format!("| Characters/Second | {cps:.1} |"));
    }
    if let Some(wps) = test.words_per_second {
        lines.push(format!("| Words/Second | {wps:.1} |"));
    }
    if let Some(ratio) = test.real_time_ratio {
        let pace = if ratio >= 1.0 { "faster" } else { "slower" };
        lines.push(format!(
            "| Real-time Ratio | {ratio:.2}x ({pace} than real-time) |"
        ));
    }
    lines.push(String::new());

    if let Some(error) = &test.error {
        lines.push("### Test Error".to_string());
        lines.push(String::new());
        push_fenced(lines, error);
        lines.push(String::new());
    }

    push_details(
        lines,
        "Test stdout (click to expand)",
        &truncate_middle(&test.stdout, TEST_STDOUT_HEAD_TAIL, TEST_STDOUT_HEAD_TAIL),
    );
    if !test.stderr.trim().is_empty() {
        push_details(
            lines,
            "Test stderr (click to expand)",
            &truncate_middle(&test.stderr, TEST_STDOUT_HEAD_TAIL, TEST_STDOUT_HEAD_TAIL),
        );
    }
}

fn push_file_table(lines: &mut Vec<String>, files: &[SizedFile]) {
    lines.push("| File | Size |".to_string());
    lines.push("|------|------|".to_string());
    for file in files {
        lines.push(format!("| {} | {} |", file.path, format_bytes(file.size)));
    }
}

fn push_fenced(lines: &mut Vec<String>, body: &str) {
    lines.push("```".to_string());
    lines.push(body.to_string());
    lines.push("```".to_string());
}

fn push_details(lines: &mut Vec<String>, summary: &str, body: &str) {
    lines.push(format!("<details><summary>{summary}</summary>"));
    lines.push(String::new());
    push_fenced(lines, body);
    lines.push(String::new());
    lines.push("</details>".to_string());
    lines.push(String::new());
}

/// Keeps the first `head` and last `tail` lines of `text` when it is longer
/// than both together, with a marker naming how many lines were dropped.
pub fn truncate_middle(text: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= head + tail {
        return text.to_string();
    }

    let omitted = lines.len() - head - tail;
    format!(
        "{}\n\n... ({omitted} lines omitted) ...\n\n{}",
        lines[..head].join("\n"),
        lines[lines.len() - tail..].join("\n")
    )
}

fn status_word(success: bool) -> &'static str {
    if success { "Success" } else { "Failed" }
}

pub fn format_datetime(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(&format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
        ))
        .unwrap_or_else(|_| "-".to_string())
}

fn format_time(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(&format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "-".to_string())
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    Overview,
    TestRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Duration,
    Bytes,
    Count,
    Rate,
    Ratio,
}

impl MetricUnit {
    pub fn format(self, value: f64) -> String {
        match self {
            MetricUnit::Duration => format_duration_ms(value),
            MetricUnit::Bytes => format_bytes(value.max(0.0) as u64),
            MetricUnit::Count => format!("{value:.0}"),
            MetricUnit::Rate => format!("{value:.1}"),
            MetricUnit::Ratio => format!("{value:.2}x"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub scope: MetricScope,
    pub unit: MetricUnit,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
    /// Signed, unit-formatted delta such as `+2.5` or `-1.2s`.
    pub display: String,
}

impl MetricDelta {
    fn new(metric: &str, scope: MetricScope, unit: MetricUnit, before: f64, after: f64) -> Self {
        let delta = after - before;
        let magnitude = unit.format(delta.abs());
        let display = if magnitude == unit.format(0.0) {
            magnitude
        } else if delta > 0.0 {
            format!("+{magnitude}")
        } else {
            format!("-{magnitude}")
        };

        Self {
            metric: metric.to_string(),
            scope,
            unit,
            before,
            after,
            delta,
            display,
        }
    }

    pub fn before_display(&self) -> String {
        self.unit.format(self.before)
    }

    pub fn after_display(&self) -> String {
        self.unit.format(self.after)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub metrics: Vec<MetricDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Comparison {
    pub fn metric(&self, name: &str) -> Option<&MetricDelta> {
        self.metrics.iter().find(|m| m.metric == name)
    }

    pub fn scoped(&self, scope: MetricScope) -> impl Iterator<Item = &MetricDelta> {
        self.metrics.iter().filter(move |m| m.scope == scope)
    }
}

/// Metric-by-metric difference `b - a`. Metrics that are missing on either
/// side are left out.
pub fn diff(a: &Report, b: &Report) -> Comparison {
    use MetricScope::{Overview, TestRun};

    let mut metrics = vec![
        MetricDelta::new(
            "Duration",
            Overview,
            MetricUnit::Duration,
            a.duration_ms as f64,
            b.duration_ms as f64,
        ),
        MetricDelta::new(
            "Storage Added",
            Overview,
            MetricUnit::Bytes,
            a.storage.total_bytes_added as f64,
            b.storage.total_bytes_added as f64,
        ),
        MetricDelta::new(
            "Phases",
            Overview,
            MetricUnit::Count,
            a.phases.len() as f64,
            b.phases.len() as f64,
        ),
        MetricDelta::new(
            "Downloads",
            Overview,
            MetricUnit::Count,
            a.downloads.len() as f64,
            b.downloads.len() as f64,
        ),
        MetricDelta::new(
            "Errors",
            Overview,
            MetricUnit::Count,
            a.errors.len() as f64,
            b.errors.len() as f64,
        ),
    ];

    let note = match (&a.test_run, &b.test_run) {
        (Some(ta), Some(tb)) => {
            metrics.push(MetricDelta::new(
                "Generation Time",
                TestRun,
                MetricUnit::Duration,
                ta.duration_ms,
                tb.duration_ms,
            ));
            if let (Some(x), Some(y)) = (ta.characters_per_second, tb.characters_per_second) {
                metrics.push(MetricDelta::new("Chars/Second", TestRun, MetricUnit::Rate, x, y));
            }
            if let (Some(x), Some(y)) = (ta.real_time_ratio, tb.real_time_ratio) {
                metrics.push(MetricDelta::new(
                    "Real-time Ratio",
                    TestRun,
                    MetricUnit::Ratio,
                    x,
                    y,
                ));
            }
            None
        }
        (None, None) => None,
        _ => Some("Only one report has test run data.".to_string()),
    };

    Comparison { metrics, note }
}

pub fn render_comparison(a: &Report, b: &Report, comparison: &Comparison) -> String {
    let mut lines = vec![
        "# Report Comparison".to_string(),
        String::new(),
        format!("Comparing: **{}** vs **{}**", a.command, b.command),
        String::new(),
        "## Overview".to_string(),
        String::new(),
    ];
    push_metric_table(&mut lines, comparison.scoped(MetricScope::Overview));
    lines.push(String::new());

    let mut test_metrics = comparison.scoped(MetricScope::TestRun).peekable();
    if test_metrics.peek().is_some() {
        lines.push("## Test Run Comparison".to_string());
        lines.push(String::new());
        push_metric_table(&mut lines, test_metrics);
        lines.push(String::new());
    }

    if let Some(note) = &comparison.note {
        lines.push(format!("_Note: {note}_"));
        lines.push(String::new());
    }

    lines.join("\n")
}

fn push_metric_table<'a>(lines: &mut Vec<String>, metrics: impl Iterator<Item = &'a MetricDelta>) {
    lines.push("| Metric | Report 1 | Report 2 | Difference |".to_string());
    lines.push("|--------|----------|----------|------------|".to_string());
    for m in metrics {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            m.metric,
            m.before_display(),
            m.after_display(),
            m.display
        ));
    }
}

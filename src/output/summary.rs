use crate::model::Report;
use crate::output::{Style, format_bytes, format_duration_ms};
use crate::report::format_datetime;
use std::io::Write;
use std::path::Path;

const PHASE_PREVIEW: usize = 10;
const DOWNLOAD_PREVIEW: usize = 5;
const ERROR_PREVIEW: usize = 3;
const ERROR_WIDTH: usize = 80;

/// Condensed terminal view of a report. `files` lists the artifacts on disk
/// (structured, rendered) when known.
pub fn print_summary(
    mut w: impl Write,
    style: &Style,
    report: &Report,
    files: Option<(&Path, &Path)>,
) -> std::io::Result<()> {
    let rule = "=".repeat(60);
    writeln!(w, "{}", style.muted(&rule))?;
    writeln!(w, "{} {}", style.bold("Report:"), style.accent(&report.command))?;
    writeln!(w, "{}", style.muted(&rule))?;
    writeln!(w)?;

    let status = if report.success {
        style.success("Success")
    } else {
        style.failure("Failed")
    };

    writeln!(w, "{}", style.bold("Overview:"))?;
    writeln!(w, "  Command:     {}", report.setup_command)?;
    writeln!(w, "  Date:        {}", format_datetime(report.started_at))?;
    writeln!(
        w,
        "  Duration:    {}",
        style.number(&format_duration_ms(report.duration_ms as f64))
    )?;
    writeln!(w, "  Status:      {status}")?;
    writeln!(w, "  Exit Code:   {}", report.exit_code)?;
    writeln!(
        w,
        "  Fresh Run:   {}",
        if report.fresh_run { "Yes" } else { "No" }
    )?;
    writeln!(w)?;

    writeln!(w, "{}", style.bold("Environment:"))?;
    writeln!(w, "  Platform:    {}", report.environment.platform)?;
    writeln!(w, "  Arch:        {}", report.environment.arch)?;
    writeln!(w, "  Version:     {}", report.environment.tool_version)?;
    writeln!(w)?;

    let storage = &report.storage;
    writeln!(w, "{}", style.bold("Storage:"))?;
    writeln!(
        w,
        "  Added:       {}",
        style.number(&format_bytes(storage.total_bytes_added))
    )?;
    if storage.total_bytes_modified > 0 {
        writeln!(
            w,
            "  Modified:    {}",
            format_bytes(storage.total_bytes_modified)
        )?;
    }
    let mut dirs: Vec<_> = storage
        .by_directory
        .iter()
        .filter(|(_, size)| **size > 0)
        .collect();
    if !dirs.is_empty() {
        dirs.sort_by(|a, b| b.1.cmp(a.1));
        writeln!(w, "  By Directory:")?;
        for (dir, size) in dirs {
            writeln!(w, "    {dir}: {}", format_bytes(*size))?;
        }
    }
    writeln!(w)?;

    if !report.phases.is_empty() {
        writeln!(w, "{} {}", style.bold("Phases:"), report.phases.len())?;
        for phase in report.phases.iter().take(PHASE_PREVIEW) {
            let duration = phase
                .duration_ms
                .map(|ms| format_duration_ms(ms as f64))
                .unwrap_or_else(|| "-".to_string());
            let status = if phase.success {
                style.success("OK")
            } else {
                style.failure("FAIL")
            };
            writeln!(w, "  [{status}] {} ({duration})", phase.name)?;
        }
        more(&mut w, style, report.phases.len(), PHASE_PREVIEW, "phases")?;
        writeln!(w)?;
    }

    if !report.downloads.is_empty() {
        writeln!(w, "{} {}", style.bold("Downloads:"), report.downloads.len())?;
        for download in report.downloads.iter().take(DOWNLOAD_PREVIEW) {
            writeln!(w, "  {}", download.display_url())?;
        }
        more(&mut w, style, report.downloads.len(), DOWNLOAD_PREVIEW, "downloads")?;
        writeln!(w)?;
    }

    if !report.errors.is_empty() {
        writeln!(
            w,
            "{} {}",
            style.bold("Errors:"),
            style.failure(&report.errors.len().to_string())
        )?;
        for error in report.errors.iter().take(ERROR_PREVIEW) {
            writeln!(w, "  {}", clip(&error.message, ERROR_WIDTH))?;
        }
        more(&mut w, style, report.errors.len(), ERROR_PREVIEW, "errors")?;
        writeln!(w)?;
    }

    if let Some(test) = &report.test_run {
        let status = if test.success {
            style.success("Success")
        } else {
            style.failure("Failed")
        };
        writeln!(w, "{}", style.bold("Test Run:"))?;
        writeln!(w, "  Command:     {}", test.command)?;
        writeln!(w, "  Status:      {status}")?;
        writeln!(
            w,
            "  Duration:    {}",
            style.number(&format_duration_ms(test.duration_ms))
        )?;
        if let (Some(chars), Some(words)) = (test.input_characters, test.input_words) {
            writeln!(w, "  Input:       {chars} chars, {words} words")?;
        }
        if let Some(output) = &test.output_file {
            writeln!(
                w,
                "  Output:      {output} ({})",
                format_bytes(test.output_size.unwrap_or(0))
            )?;
        }
        if let Some(seconds) = test.output_duration_seconds {
            writeln!(w, "  Audio:       {seconds:.2}s")?;
        }
        if let Some(cps) = test.characters_per_second {
            writeln!(w, "  Speed:       {cps:.1} chars/sec")?;
        }
        if let Some(ratio) = test.real_time_ratio {
            writeln!(w, "  RT Ratio:    {ratio:.2}x")?;
        }
        if let Some(error) = &test.error {
            writeln!(w, "  Error:       {}", style.failure(error))?;
        }
        writeln!(w)?;
    }

    if let Some((json, markdown)) = files {
        writeln!(w, "{}", style.bold("Report files:"))?;
        writeln!(w, "  JSON:     {}", json.display())?;
        writeln!(w, "  Markdown: {}", markdown.display())?;
    }

    Ok(())
}

fn more(
    w: &mut impl Write,
    style: &Style,
    total: usize,
    shown: usize,
    noun: &str,
) -> std::io::Result<()> {
    if total > shown {
        writeln!(w, "  {}", style.muted(&format!("... and {} more {noun}", total - shown)))?;
    }
    Ok(())
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width).collect();
    format!("{head}...")
}

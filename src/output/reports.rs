use crate::model::ReportSummary;
use crate::output::{Style, format_bytes, format_duration_ms};
use std::io::Write;

pub fn print_reports(
    mut w: impl Write,
    style: &Style,
    rows: &[ReportSummary],
) -> std::io::Result<()> {
    if rows.is_empty() {
        writeln!(w, "{} No reports yet.", style.info("i"))?;
        return Ok(());
    }

    for (idx, row) in rows.iter().enumerate() {
        let status = if row.success {
            style.success("ok success")
        } else {
            style.failure("x failed")
        };

        let started = row
            .started_at
            .format(&time::macros::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .unwrap_or_else(|_| "-".to_string());

        writeln!(w, "{} {}", style.accent(&row.name), status)?;
        writeln!(w, "  command: {}", row.command)?;
        writeln!(w, "  started (UTC): {}", started)?;
        writeln!(
            w,
            "  duration: {}",
            style.number(&format_duration_ms(row.duration_ms as f64))
        )?;
        writeln!(
            w,
            "  storage added: {}",
            style.number(&format_bytes(row.storage_added))
        )?;
        if row.has_test_run {
            writeln!(w, "  test run: {}", style.muted("yes"))?;
        }

        if idx + 1 < rows.len() {
            writeln!(w)?;
        }
    }

    Ok(())
}

use crate::model::Report;
use crate::output::Style;
use crate::report::{Comparison, MetricScope, format_datetime};
use std::io::Write;

const METRIC_WIDTH: usize = 20;
const VALUE_WIDTH: usize = 25;
const RULE_WIDTH: usize = 70;

pub fn print_comparison(
    mut w: impl Write,
    style: &Style,
    a: &Report,
    b: &Report,
    comparison: &Comparison,
) -> std::io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH);

    writeln!(w, "{}", style.muted(&rule))?;
    writeln!(w, "{}", style.bold("Report Comparison"))?;
    writeln!(w, "{}", style.muted(&rule))?;
    writeln!(w)?;

    writeln!(w, "{}", row("Metric", "Report 1", "Report 2", "Difference"))?;
    writeln!(w, "{}", style.muted(&thin))?;

    writeln!(w, "{}", row("Command", &a.setup_command, &b.setup_command, ""))?;
    writeln!(
        w,
        "{}",
        row(
            "Date",
            &format_datetime(a.started_at),
            &format_datetime(b.started_at),
            ""
        )
    )?;
    writeln!(
        w,
        "{}",
        row("Status", status_word(a.success), status_word(b.success), "")
    )?;

    for metric in comparison.scoped(MetricScope::Overview) {
        writeln!(
            w,
            "{}",
            row(
                &metric.metric,
                &metric.before_display(),
                &metric.after_display(),
                &metric.display
            )
        )?;
    }

    let mut test_metrics = comparison.scoped(MetricScope::TestRun).peekable();
    if test_metrics.peek().is_some() {
        writeln!(w)?;
        writeln!(w, "{}", style.muted(&thin))?;
        writeln!(w, "{}", style.bold("Test Run Comparison"))?;
        writeln!(w, "{}", style.muted(&thin))?;
        for metric in test_metrics {
            writeln!(
                w,
                "{}",
                row(
                    &metric.metric,
                    &metric.before_display(),
                    &metric.after_display(),
                    &metric.display
                )
            )?;
        }
    }

    if let Some(note) = &comparison.note {
        writeln!(w)?;
        writeln!(w, "{} {note}", style.warning("Note:"))?;
    }

    Ok(())
}

fn row(metric: &str, before: &str, after: &str, diff: &str) -> String {
    let line = format!(
        "{metric:<mw$}{before:<vw$}{after:<vw$}{diff}",
        mw = METRIC_WIDTH,
        vw = VALUE_WIDTH
    );
    line.trim_end().to_string()
}

fn status_word(success: bool) -> &'static str {
    if success { "Success" } else { "Failed" }
}

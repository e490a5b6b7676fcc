use crate::markers::MarkerStatus;
use crate::output::Style;
use std::io::Write;

#[derive(Debug, Clone)]
pub struct SetupRow {
    pub name: String,
    pub description: String,
    pub command: String,
    pub markers: Vec<MarkerStatus>,
    pub validation: Option<String>,
}

pub fn print_setups(mut w: impl Write, style: &Style, rows: &[SetupRow]) -> std::io::Result<()> {
    if rows.is_empty() {
        writeln!(
            w,
            "{} {}",
            style.info("i"),
            style.muted("No setups configured. Run `setup-report init` to create a config.")
        )?;
        return Ok(());
    }

    for (idx, row) in rows.iter().enumerate() {
        writeln!(w, "{}", style.bold(&row.name))?;

        if !row.description.trim().is_empty() {
            writeln!(w, "  description: {}", row.description)?;
        }

        let command = if row.command.trim().is_empty() {
            "-"
        } else {
            row.command.as_str()
        };
        writeln!(w, "  command: {}", style.info(command))?;

        if !row.markers.is_empty() {
            let markers: Vec<String> = row
                .markers
                .iter()
                .map(|m| {
                    if m.exists {
                        format!("{} {}", m.marker, style.success("(present)"))
                    } else {
                        format!("{} {}", m.marker, style.muted("(missing)"))
                    }
                })
                .collect();
            writeln!(w, "  markers: {}", markers.join(", "))?;
        }

        if let Some(validation) = &row.validation {
            writeln!(w, "  validation: {}", style.muted(validation))?;
        }

        if idx + 1 < rows.len() {
            writeln!(w)?;
        }
    }

    Ok(())
}

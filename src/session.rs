//! One observed run, end to end: markers, snapshot, watch, spawn and parse,
//! settle, stop, metrics, optional validation, report.

use crate::config::{ResolvedSetup, Settings};
use crate::markers;
use crate::model::{Environment, Report};
use crate::parser::LogParser;
use crate::report::{self, ReportError, ReportInputs};
use crate::runner::{self, Request};
use crate::tracker::ChangeTracker;
use crate::validation::{MediaProbe, ValidationRunner};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Remove the setup's marker files first so it redoes all work.
    pub fresh: bool,
    pub skip_validation: bool,
    pub input_override: Option<String>,
    /// Mirror command output to the terminal.
    pub stream_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Ran,
    NotConfigured,
    Skipped,
    SetupFailed,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub report: Report,
    pub removed_markers: Vec<PathBuf>,
    pub validation: ValidationOutcome,
}

pub fn run(
    setup: &ResolvedSetup,
    settings: &Settings,
    opts: &SessionOptions,
    probe: Box<dyn MediaProbe>,
) -> Result<SessionOutcome, ReportError> {
    let started_at = OffsetDateTime::now_utc();
    let clock = Instant::now();
    tracing::info!(setup = %setup.name, fresh = opts.fresh, "session started");

    let removed_markers = if opts.fresh {
        markers::remove_markers(&settings.markers_dir, &setup.markers)
    } else {
        Vec::new()
    };

    let mut tracker = ChangeTracker::new(&settings.base_dir, &settings.roots, settings.tracker());
    tracker.snapshot();
    tracker.watch();

    let mut env = setup.env.clone();
    env.insert("FORCE_COLOR".to_string(), "1".to_string());

    let request = Request {
        name: setup.name.clone(),
        command_preview: setup.command_preview.clone(),
        use_shell: setup.use_shell,
        exec: setup.exec.clone(),
        shell: setup.shell.clone(),
        dir: settings.base_dir.to_string_lossy().into_owned(),
        env,
        stream_output: opts.stream_output,
    };

    let mut parser = LogParser::new();
    let result = match runner::execute(&request, |line| parser.parse_line(&line.text, line.stream)) {
        Ok(result) => result,
        Err(failure) => {
            tracing::warn!(command = %setup.command_preview, error = %failure.message, "setup command could not run");
            let mut result = failure.result;
            result.stderr.push_str(&format!("runner error: {}\n", failure.message));
            result
        }
    };

    parser.finalize();

    // Watchers stay attached through the settle window so notifications for
    // the command's last writes still reach the log.
    if !settings.settle.is_zero() {
        thread::sleep(settings.settle);
    }
    tracker.stop();

    let storage = tracker.metrics();
    let file_operations = tracker.operations().to_vec();
    let ended_at = OffsetDateTime::now_utc();
    let duration_ms = clock.elapsed().as_millis() as u64;

    let (test_run, validation) = match &setup.validation {
        None => (None, ValidationOutcome::NotConfigured),
        Some(_) if opts.skip_validation => (None, ValidationOutcome::Skipped),
        Some(_) if !result.success() => {
            tracing::info!(exit_code = result.exit_code, "skipping validation because setup failed");
            (None, ValidationOutcome::SetupFailed)
        }
        Some(spec) => {
            let runner = ValidationRunner::new(probe).stream_output(opts.stream_output);
            let test = runner.run(spec, opts.input_override.as_deref());
            (Some(test), ValidationOutcome::Ran)
        }
    };

    let report = report::build(ReportInputs {
        command: setup.display_name.clone(),
        setup_command: setup.command_preview.clone(),
        started_at,
        ended_at,
        duration_ms,
        exit_code: result.exit_code,
        fresh_run: opts.fresh,
        phases: parser.phases().to_vec(),
        file_operations,
        downloads: parser.raw_downloads().to_vec(),
        errors: parser.errors().to_vec(),
        storage,
        test_run,
        environment: Environment::current(settings.base_dir.display().to_string()),
        stdout: result.stdout,
        stderr: result.stderr,
    })?;

    tracing::info!(
        setup = %setup.name,
        exit_code = report.exit_code,
        phases = report.phases.len(),
        downloads = report.downloads.len(),
        "session finished"
    );

    Ok(SessionOutcome {
        report,
        removed_markers,
        validation,
    })
}

use crate::app_error::AppError;
use crate::config::{self, Config, DEFAULT_PATH, ResolvedSetup};
use crate::markers::{self, MarkerStatus};
use crate::model::{Report, ReportSummary};
use crate::output::{self, SetupRow, Style};
use crate::report;
use crate::runner;
use crate::session::{self, SessionOptions, ValidationOutcome};
use crate::store::{self, ReportStore, SavedPaths};
use crate::validation::FfprobeProbe;
use crate::version;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Generator, generate};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SETUP_REPORT_LOG";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"version: 1

watch:
  base_dir: "."          # paths below are relative to this directory
  roots: ["build/bin", "build/models", "build/config", "build/pyenv", "build/src"]

reports:
  dir: "reports"

timing:
  debounce: "100ms"      # identical file events inside this window count once
  settle: "500ms"        # wait after the command exits before measuring sizes
  probe_timeout: "10s"   # ffprobe limit when measuring audio output

storage:
  largest_files: 10

markers_dir: "build/config"

setups:
  "setup:tts":
    description: shared text-to-speech environment
    exec: ["bun", "run", "setup:tts"]
    markers: [".tts-env-installed"]

  "setup:tts:fish":
    description: Fish Audio text-to-speech
    exec: ["bun", "run", "setup:tts:fish"]
    markers: [".fish-audio-installed", ".tts-env-installed"]
    validation:
      type: audio
      input: "input/sample.md"
      exec: ["bun", "as", "--", "tts", "input/sample.md", "--fish-audio"]
      output_dir: "output"

  "setup:transcription":
    description: whisper transcription
    exec: ["bun", "run", "setup:transcription"]
    markers: [".whisper-installed", ".models-downloaded"]
    validation:
      type: text
      input: "input/audio.mp3"
      exec: ["bun", "as", "--", "text", "--file", "input/audio.mp3", "--whisper", "base"]
      output_dir: "output"

  # shell example:
  # "setup:clean":
  #   run: "rm -rf ./build"
"#;

#[derive(Debug, Parser)]
#[command(
    name = "setup-report",
    version = version::VALUE,
    about = "Run setup commands under observation and report what they did",
    styles = clap_styles()
)]
struct Cli {
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a starter setup-report.yml
    Init(InitArgs),
    /// Run a setup (or an inline command after --) and save its report
    Run(RunArgs),
    /// List configured setups, or saved reports with --reports
    List(ListArgs),
    /// Show one saved report
    View(ViewArgs),
    /// Compare two saved reports
    Compare(CompareArgs),
    Version,
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    setup: Option<String>,
    #[arg(last = true, allow_hyphen_values = true)]
    inline: Vec<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Report name for an inline command
    #[arg(long)]
    name: Option<String>,

    /// Remove marker files before running
    #[arg(long)]
    fresh: bool,

    /// Skip the post-setup validation run
    #[arg(long = "skip-test")]
    skip_test: bool,

    /// Custom input file for the validation run
    #[arg(long)]
    input: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    reports: bool,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ViewArgs {
    name: String,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, conflicts_with = "markdown")]
    json: bool,
    #[arg(long)]
    markdown: bool,
}

#[derive(Debug, Args)]
struct CompareArgs {
    first: String,
    second: String,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, conflicts_with = "markdown")]
    json: bool,
    #[arg(long)]
    markdown: bool,
}

#[derive(Debug, Args)]
struct CompletionArgs {
    #[arg(value_enum)]
    shell: Shell,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Shell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

fn clap_styles() -> Styles {
    Styles::plain()
        .header(AnsiColor::White.on_default() | Effects::BOLD)
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
        .valid(AnsiColor::Cyan.on_default())
        .invalid(AnsiColor::Cyan.on_default())
        .context(AnsiColor::White.on_default())
        .context_value(AnsiColor::Cyan.on_default())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Returns the process exit code: the observed command's code for `run`, 0
/// otherwise.
pub fn run_cli() -> Result<i32, AppError> {
    let cli = Cli::parse();
    let style = Style::detect(cli.no_color);
    init_logging();

    match cli.command {
        Commands::Init(args) => run_init(args, &style).map(|_| 0),
        Commands::Run(args) => run_run(args, &style),
        Commands::List(args) => run_list(args, &style).map(|_| 0),
        Commands::View(args) => run_view(args, &style).map(|_| 0),
        Commands::Compare(args) => run_compare(args, &style).map(|_| 0),
        Commands::Version => {
            println!("{}", version::VALUE);
            Ok(0)
        }
        Commands::Completion(args) => run_completion(args).map(|_| 0),
    }
}

fn run_init(args: InitArgs, style: &Style) -> Result<(), AppError> {
    let config_path = args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_PATH));

    if config_path.exists() && !args.force {
        return Err(AppError::usage(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
        .map_err(|e| AppError::internal(format!("write {}: {e}", config_path.display())))?;

    println!(
        "created {}",
        style.info(&config_path.display().to_string())
    );
    Ok(())
}

fn run_run(args: RunArgs, style: &Style) -> Result<i32, AppError> {
    let cfg = load_config_optional(args.config.as_deref())?;

    let resolved = if !args.inline.is_empty() {
        if args.setup.is_some() {
            return Err(AppError::usage(
                "inline mode requires only command args after --",
            ));
        }
        if args.input.is_some() {
            return Err(AppError::usage(
                "--input needs a configured setup with a validation command",
            ));
        }
        config::resolve_inline(&args.inline, args.name.as_deref().unwrap_or_default())
            .map_err(AppError::usage)?
    } else {
        if args.name.is_some() {
            return Err(AppError::usage(
                "--name is an inline-only flag; use with 'setup-report run --name NAME -- <command>'",
            ));
        }
        let setup_name = args
            .setup
            .as_deref()
            .ok_or_else(|| AppError::usage("run requires a setup name or a command after --"))?;
        let settings = settings_for(&cfg)?;
        cfg.resolve_setup(setup_name, &settings)
            .map_err(AppError::usage)?
    };

    let settings = settings_for(&cfg)?;

    if !args.json {
        print_banner(style, &resolved, args.fresh);
    }

    let opts = SessionOptions {
        fresh: args.fresh,
        skip_validation: args.skip_test,
        input_override: args.input.clone(),
        stream_output: !args.json,
    };
    let probe = FfprobeProbe {
        timeout: settings.probe_timeout,
    };

    let outcome = session::run(&resolved, &settings, &opts, Box::new(probe))?;
    let report = outcome.report;

    let store = ReportStore::new(&settings.reports_dir);
    let name = store::report_name(&report.command, args.input.as_deref(), report.started_at);
    let saved = store.save(&report, &name)?;

    if args.json {
        print_run_json(&name, &saved, &report)
            .map_err(|e| AppError::internal(format!("encode json: {e}")))?;
        return Ok(report.exit_code);
    }

    let mut stdout = io::stdout().lock();
    print_run_footer(&mut stdout, style, &outcome.removed_markers, &outcome.validation, &report)
        .and_then(|_| {
            output::print_summary(
                &mut stdout,
                style,
                &report,
                Some((&saved.json, &saved.markdown)),
            )
        })
        .map_err(|e| AppError::internal(format!("print summary: {e}")))?;

    Ok(report.exit_code)
}

fn print_banner(style: &Style, setup: &ResolvedSetup, fresh: bool) {
    let rule = "=".repeat(60);
    let started = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "-".to_string());

    println!("{}", style.muted(&rule));
    println!("{} {}", style.bold("Setup Report:"), style.accent(&setup.name));
    println!("Command: {}", style.info(&setup.command_preview));
    println!("Started: {started}");
    println!("Fresh run: {fresh}");
    println!("{}", style.muted(&rule));
    println!();
}

fn print_run_footer(
    w: &mut impl Write,
    style: &Style,
    removed: &[PathBuf],
    validation: &ValidationOutcome,
    report: &Report,
) -> io::Result<()> {
    writeln!(w)?;

    if !removed.is_empty() {
        writeln!(
            w,
            "{} removed {} marker file(s) for fresh run",
            style.bullet("-"),
            removed.len()
        )?;
        for path in removed {
            writeln!(w, "    {}", style.muted(&path.display().to_string()))?;
        }
    }

    if *validation == ValidationOutcome::SetupFailed {
        writeln!(
            w,
            "{} skipping validation because setup failed",
            style.warning("warn")
        )?;
    }

    if !report.success
        && let Some(tail) = runner::tail(&report.stderr, 5, 400)
    {
        writeln!(w, "{} stderr tail:", style.failure("x"))?;
        for line in tail.lines() {
            writeln!(w, "    {line}")?;
        }
    }

    writeln!(w)
}

#[derive(Serialize)]
struct RunJsonPayload<'a> {
    name: &'a str,
    json_path: &'a Path,
    markdown_path: &'a Path,
    report: &'a Report,
}

fn print_run_json(name: &str, saved: &SavedPaths, report: &Report) -> Result<(), io::Error> {
    let payload = RunJsonPayload {
        name,
        json_path: &saved.json,
        markdown_path: &saved.markdown,
        report,
    };

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &payload)?;
    writeln!(stdout)
}

fn run_list(args: ListArgs, style: &Style) -> Result<(), AppError> {
    let cfg = load_config_optional(args.config.as_deref())?;

    if args.reports {
        let settings = settings_for(&cfg)?;
        let rows = ReportStore::new(&settings.reports_dir).list()?;

        if args.json {
            return write_json(&rows);
        }

        output::print_reports(io::stdout().lock(), style, &rows)
            .map_err(|e| AppError::internal(format!("print reports: {e}")))?;
        if !rows.is_empty() {
            println!();
            println!("Total: {} report(s)", rows.len());
        }
        return Ok(());
    }

    #[derive(Serialize)]
    struct SetupJson {
        name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        description: String,
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        markers: Vec<MarkerStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        validation: Option<String>,
    }

    let markers_dir = settings_for(&cfg)?.markers_dir;
    let items: Vec<SetupJson> = cfg
        .setups
        .iter()
        .map(|(name, setup)| SetupJson {
            name: name.clone(),
            description: setup.description.clone(),
            command: if setup.exec.is_empty() {
                setup.run.clone()
            } else {
                setup.exec.join(" ")
            },
            markers: markers::check_markers(&markers_dir, &setup.markers),
            validation: setup
                .validation
                .as_ref()
                .map(|v| format!("{} ({})", v.exec.join(" "), v.kind)),
        })
        .collect();

    if args.json {
        return write_json(&items);
    }

    let rows: Vec<SetupRow> = items
        .into_iter()
        .map(|item| SetupRow {
            name: item.name,
            description: item.description,
            command: compact_command(&item.command, 100),
            markers: item.markers,
            validation: item.validation,
        })
        .collect();

    output::print_setups(io::stdout().lock(), style, &rows)
        .map_err(|e| AppError::internal(format!("print setups: {e}")))
}

fn run_view(args: ViewArgs, style: &Style) -> Result<(), AppError> {
    let cfg = load_config_optional(args.config.as_deref())?;
    let settings = settings_for(&cfg)?;
    let store = ReportStore::new(&settings.reports_dir);
    let (path, report) = store.load(&args.name)?;
    let rendered = store::rendered_path(&path);

    if args.markdown {
        match fs::read_to_string(&rendered) {
            Ok(text) => {
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(path = %rendered.display(), error = %err, "rendered report unavailable");
                eprintln!(
                    "{} rendered report not found, showing summary instead",
                    style.warning("warn")
                );
            }
        }
    }

    if args.json {
        return write_json(&report);
    }

    output::print_summary(io::stdout().lock(), style, &report, Some((&path, &rendered)))
        .map_err(|e| AppError::internal(format!("print summary: {e}")))
}

fn run_compare(args: CompareArgs, style: &Style) -> Result<(), AppError> {
    let cfg = load_config_optional(args.config.as_deref())?;
    let settings = settings_for(&cfg)?;
    let store = ReportStore::new(&settings.reports_dir);

    let (_, first) = store.load(&args.first)?;
    let (_, second) = store.load(&args.second)?;
    let comparison = report::diff(&first, &second);

    if args.markdown {
        println!("{}", report::render_comparison(&first, &second, &comparison));
        return Ok(());
    }

    if args.json {
        #[derive(Serialize)]
        struct ComparisonJson<'a> {
            report1: ReportSummary,
            report2: ReportSummary,
            #[serde(flatten)]
            comparison: &'a report::Comparison,
        }

        return write_json(&ComparisonJson {
            report1: ReportSummary::from_report(&args.first, store.resolve(&args.first)?, &first),
            report2: ReportSummary::from_report(&args.second, store.resolve(&args.second)?, &second),
            comparison: &comparison,
        });
    }

    output::print_comparison(io::stdout().lock(), style, &first, &second, &comparison)
        .map_err(|e| AppError::internal(format!("print comparison: {e}")))
}

fn load_config_optional(path: Option<&Path>) -> Result<Config, AppError> {
    let explicit = path.is_some();
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_PATH));

    if !path.exists() {
        if explicit {
            return Err(AppError::usage(format!(
                "config file {} not found",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    config::load(path).map_err(|err| {
        if err.starts_with("read config:") {
            AppError::internal(err)
        } else {
            AppError::usage(err)
        }
    })
}

fn settings_for(cfg: &Config) -> Result<config::Settings, AppError> {
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::internal(format!("resolve working directory: {e}")))?;
    cfg.settings(&cwd).map_err(AppError::usage)
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(|e| AppError::internal(format!("encode json: {e}")))?;
    writeln!(stdout).map_err(|e| AppError::internal(format!("write output: {e}")))
}

fn compact_command(command: &str, max_chars: usize) -> String {
    let compact = command.split_whitespace().collect::<Vec<_>>().join(" ");

    if max_chars == 0 || compact.chars().count() <= max_chars {
        return compact;
    }

    let limit = max_chars.max(4) - 3;
    format!("{}...", compact.chars().take(limit).collect::<String>())
}

fn run_completion(args: CompletionArgs) -> Result<(), AppError> {
    let mut cmd = Cli::command();
    let mut stdout = io::stdout().lock();

    match args.shell {
        Shell::Bash => generate_completion(clap_complete::shells::Bash, &mut cmd, &mut stdout),
        Shell::Zsh => generate_completion(clap_complete::shells::Zsh, &mut cmd, &mut stdout),
        Shell::Fish => generate_completion(clap_complete::shells::Fish, &mut cmd, &mut stdout),
        Shell::Powershell => {
            generate_completion(clap_complete::shells::PowerShell, &mut cmd, &mut stdout)
        }
    }
    .map_err(|e| AppError::internal(format!("generate completion: {e}")))
}

fn generate_completion<G: Generator>(
    generator: G,
    cmd: &mut clap::Command,
    writer: &mut impl Write,
) -> Result<(), io::Error> {
    generate(generator, cmd, "setup-report", writer);
    writer.flush()
}

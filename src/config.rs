use crate::tracker::{DEFAULT_DEBOUNCE, DEFAULT_LARGEST_FILES, TrackerSettings};
use crate::validation::{ArtifactKind, DEFAULT_PROBE_TIMEOUT, ValidationSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

pub const CURRENT_VERSION: i32 = 1;
pub const DEFAULT_PATH: &str = "./setup-report.yml";

pub const DEFAULT_ROOTS: &[&str] = &[
    "build/bin",
    "build/models",
    "build/config",
    "build/pyenv",
    "build/src",
];
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const DEFAULT_MARKERS_DIR: &str = "build/config";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

static SETUP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9:._-]{0,62}$").expect("valid regex"));

const VALID_VALIDATION_TYPES: &[&str] = &["audio", "text"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: i32,
    pub watch: Watch,
    pub reports: Reports,
    pub timing: Timing,
    pub storage: Storage,
    pub markers_dir: String,
    pub setups: BTreeMap<String, Setup>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            watch: Watch::default(),
            reports: Reports::default(),
            timing: Timing::default(),
            storage: Storage::default(),
            markers_dir: String::new(),
            setups: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Watch {
    pub base_dir: String,
    pub roots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Reports {
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Timing {
    pub debounce: String,
    pub settle: String,
    pub probe_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Storage {
    pub largest_files: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Setup {
    pub description: String,
    pub exec: Vec<String>,
    pub run: String,
    pub env: HashMap<String, String>,
    pub markers: Vec<String>,
    pub validation: Option<Validation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Validation {
    #[serde(rename = "type")]
    pub kind: String,
    pub input: String,
    pub exec: Vec<String>,
    pub output_dir: String,
}

/// Config values with defaults applied and paths anchored at the base
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub roots: Vec<String>,
    pub reports_dir: PathBuf,
    pub markers_dir: PathBuf,
    pub debounce: Duration,
    pub settle: Duration,
    pub probe_timeout: Duration,
    pub largest_files: usize,
}

impl Settings {
    pub fn tracker(&self) -> TrackerSettings {
        TrackerSettings {
            debounce: self.debounce,
            largest_files: self.largest_files,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSetup {
    /// Name as given on the command line or in the config.
    pub name: String,
    /// Name shown in reports; a leading `setup:` is dropped.
    pub display_name: String,
    pub command_preview: String,
    pub use_shell: bool,
    pub exec: Vec<String>,
    pub shell: String,
    pub env: HashMap<String, String>,
    pub markers: Vec<String>,
    pub validation: Option<ValidationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F: Into<String>, M: Into<String>>(&mut self, field: F, message: M) {
        self.issues.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.issues.first() {
            write!(
                f,
                "configuration validation failed: {}: {}",
                first.field, first.message
            )
        } else {
            write!(f, "configuration validation failed")
        }
    }
}

impl std::error::Error for ValidationErrors {}

pub fn load(path: &Path) -> Result<Config, String> {
    let cfg = parse(path)?;
    validate(&cfg).map_err(|e| e.to_string())?;
    Ok(cfg)
}

pub fn parse(path: &Path) -> Result<Config, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read config: {e}"))?;
    let cfg: Config = serde_yaml::from_str(&text).map_err(|e| format!("parse config yaml: {e}"))?;
    Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<(), ValidationErrors> {
    let mut issues = ValidationErrors::new();

    if cfg.version != CURRENT_VERSION {
        issues.add("version", format!("must be {CURRENT_VERSION}"));
    }

    for (idx, root) in cfg.watch.roots.iter().enumerate() {
        if let Err(message) = check_relative(root) {
            issues.add(format!("watch.roots[{idx}]"), message);
        }
    }

    for (field, value) in [
        ("timing.debounce", &cfg.timing.debounce),
        ("timing.settle", &cfg.timing.settle),
        ("timing.probe_timeout", &cfg.timing.probe_timeout),
    ] {
        if !value.is_empty() && parse_duration(value).is_err() {
            issues.add(field, "must be a valid duration");
        }
    }

    if cfg.storage.largest_files == Some(0) {
        issues.add("storage.largest_files", "must be at least 1");
    }

    for (name, setup) in &cfg.setups {
        validate_setup_name(&mut issues, name);
        validate_setup(&mut issues, name, setup);
    }

    if issues.has_issues() {
        Err(issues)
    } else {
        Ok(())
    }
}

impl Config {
    pub fn settings(&self, cwd: &Path) -> Result<Settings, String> {
        let base_dir = if self.watch.base_dir.is_empty() {
            cwd.to_path_buf()
        } else {
            anchor(cwd, &self.watch.base_dir)
        };

        let roots = if self.watch.roots.is_empty() {
            DEFAULT_ROOTS.iter().map(|r| r.to_string()).collect()
        } else {
            self.watch.roots.clone()
        };

        let reports_dir = anchor(&base_dir, or_default(&self.reports.dir, DEFAULT_REPORTS_DIR));
        let markers_dir = anchor(&base_dir, or_default(&self.markers_dir, DEFAULT_MARKERS_DIR));

        let debounce = resolve_duration(&self.timing.debounce, DEFAULT_DEBOUNCE)
            .map_err(|e| format!("timing.debounce: {e}"))?;
        let settle = resolve_duration(&self.timing.settle, DEFAULT_SETTLE)
            .map_err(|e| format!("timing.settle: {e}"))?;
        let probe_timeout = resolve_duration(&self.timing.probe_timeout, DEFAULT_PROBE_TIMEOUT)
            .map_err(|e| format!("timing.probe_timeout: {e}"))?;

        Ok(Settings {
            base_dir,
            roots,
            reports_dir,
            markers_dir,
            debounce,
            settle,
            probe_timeout,
            largest_files: self.storage.largest_files.unwrap_or(DEFAULT_LARGEST_FILES),
        })
    }

    pub fn resolve_setup(&self, name: &str, settings: &Settings) -> Result<ResolvedSetup, String> {
        let setup = self.setups.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.setups.keys().map(String::as_str).collect();
            if known.is_empty() {
                format!("setup {name:?} not found (no setups configured)")
            } else {
                format!("setup {name:?} not found (known: {})", known.join(", "))
            }
        })?;

        let lookup: HashMap<String, String> = std::env::vars().collect();
        let env = expand_env(&setup.env, lookup);

        let validation = match &setup.validation {
            Some(v) => Some(resolve_validation(v, settings).map_err(|e| format!("setup {name:?} {e}"))?),
            None => None,
        };

        let mut resolved = ResolvedSetup {
            name: name.to_string(),
            display_name: display_name(name),
            command_preview: String::new(),
            use_shell: false,
            exec: Vec::new(),
            shell: String::new(),
            env,
            markers: setup.markers.clone(),
            validation,
        };

        if !setup.exec.is_empty() {
            resolved.exec = setup.exec.clone();
            resolved.command_preview = join_command_preview(&setup.exec);
        } else {
            resolved.use_shell = true;
            resolved.shell = setup.run.clone();
            resolved.command_preview = setup.run.clone();
        }

        Ok(resolved)
    }
}

/// An ad-hoc command given after `--`. Never validated or fresh-run capable.
pub fn resolve_inline(args: &[String], name: &str) -> Result<ResolvedSetup, String> {
    if args.is_empty() {
        return Err("inline command is required after --".to_string());
    }

    let setup_name = if name.trim().is_empty() {
        args[0].clone()
    } else {
        name.to_string()
    };

    Ok(ResolvedSetup {
        display_name: display_name(&setup_name),
        name: setup_name,
        command_preview: join_command_preview(args),
        use_shell: false,
        exec: args.to_vec(),
        shell: String::new(),
        env: HashMap::new(),
        markers: Vec::new(),
        validation: None,
    })
}

fn resolve_validation(v: &Validation, settings: &Settings) -> Result<ValidationSpec, String> {
    let kind = match v.kind.as_str() {
        "audio" => ArtifactKind::Audio,
        "text" => ArtifactKind::Text,
        other => return Err(format!("validation.type {other:?} must be audio or text")),
    };

    Ok(ValidationSpec {
        kind,
        input: v.input.clone(),
        command: v.exec.clone(),
        output_dir: or_default(&v.output_dir, DEFAULT_OUTPUT_DIR).to_string(),
        dir: settings.base_dir.clone(),
    })
}

fn validate_setup_name(issues: &mut ValidationErrors, name: &str) {
    if !SETUP_NAME_RE.is_match(name) {
        issues.add(
            format!("setups.{name}"),
            "name must match ^[A-Za-z0-9][A-Za-z0-9:._-]{0,62}$",
        );
    }
}

fn validate_setup(issues: &mut ValidationErrors, name: &str, setup: &Setup) {
    let field = format!("setups.{name}");
    let has_exec = !setup.exec.is_empty();
    let has_run = !setup.run.trim().is_empty();

    if has_exec == has_run {
        issues.add(field.clone(), "must define exactly one of exec or run");
    }

    for (idx, tok) in setup.exec.iter().enumerate() {
        if tok.is_empty() {
            issues.add(format!("{field}.exec[{idx}]"), "must not be empty");
        }
    }

    for (idx, marker) in setup.markers.iter().enumerate() {
        if let Err(message) = check_relative(marker) {
            issues.add(format!("{field}.markers[{idx}]"), message);
        }
    }

    let Some(v) = &setup.validation else {
        return;
    };

    let vfield = format!("{field}.validation");
    if !VALID_VALIDATION_TYPES.contains(&v.kind.as_str()) {
        issues.add(format!("{vfield}.type"), "must be one of audio, text");
    }
    if v.input.trim().is_empty() {
        issues.add(format!("{vfield}.input"), "is required");
    }
    if v.exec.is_empty() {
        issues.add(format!("{vfield}.exec"), "is required");
    }
    for (idx, tok) in v.exec.iter().enumerate() {
        if tok.is_empty() {
            issues.add(format!("{vfield}.exec[{idx}]"), "must not be empty");
        }
    }
}

fn check_relative(path: &str) -> Result<(), &'static str> {
    if path.trim().is_empty() {
        return Err("must not be empty");
    }

    let p = Path::new(path);
    if p.is_absolute() {
        return Err("must be a relative path");
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("must not contain '..'");
    }

    Ok(())
}

fn parse_duration(text: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(text)
}

fn resolve_duration(value: &str, default_value: Duration) -> Result<Duration, String> {
    if value.is_empty() {
        return Ok(default_value);
    }

    parse_duration(value).map_err(|_| "must be a valid duration".to_string())
}

fn or_default<'a>(value: &'a str, default_value: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default_value
    } else {
        value
    }
}

fn anchor(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn display_name(name: &str) -> String {
    name.strip_prefix("setup:").unwrap_or(name).to_string()
}

fn join_command_preview(args: &[String]) -> String {
    args.join(" ")
}

/// Expands `$VAR` and `${VAR}` in setup env values, in key order, so later
/// keys may refer to earlier ones.
fn expand_env(
    env: &HashMap<String, String>,
    mut lookup: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();

    let mut out = HashMap::with_capacity(env.len());
    for key in keys {
        if let Some(value) = env.get(key) {
            let expanded = expand_variables(value, &lookup);
            lookup.insert(key.clone(), expanded.clone());
            out.insert(key.clone(), expanded);
        }
    }
    out
}

/// Unknown variables are left as `${NAME}`.
pub fn expand_variables(value: &str, lookup: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{')
            && let Some(end) = braced.find('}')
        {
            let key = &braced[..end];
            match lookup.get(key) {
                Some(found) => out.push_str(found),
                None => out.push_str(&format!("${{{key}}}")),
            }
            rest = &braced[end + 1..];
            continue;
        }

        let len = after
            .char_indices()
            .take_while(|(i, ch)| {
                if *i == 0 {
                    ch.is_ascii_alphabetic() || *ch == '_'
                } else {
                    ch.is_ascii_alphanumeric() || *ch == '_'
                }
            })
            .count();

        if len == 0 {
            out.push('$');
            rest = after;
            continue;
        }

        let key = &after[..len];
        match lookup.get(key) {
            Some(found) => out.push_str(found),
            None => out.push_str(&format!("${{{key}}}")),
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

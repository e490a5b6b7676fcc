//! Post-setup validation: runs a second command against what the setup
//! installed and measures its throughput.

use crate::model::TestRunResult;
use crate::runner::{self, Request};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};
use wait_timeout::ChildExt;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Audio,
    Text,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Text => "text",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Audio => &["wav", "mp3"],
            ArtifactKind::Text => &["txt", "md"],
        }
    }

    fn accepts(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions()
                    .iter()
                    .any(|want| ext.eq_ignore_ascii_case(want))
            })
    }
}

/// `input` and `output_dir` are relative to `dir` (the working directory of
/// the validation command) unless absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSpec {
    pub kind: ArtifactKind,
    pub input: String,
    pub command: Vec<String>,
    pub output_dir: String,
    pub dir: PathBuf,
}

/// Reads the playback length of a media file.
pub trait MediaProbe: Send {
    fn duration_seconds(&self, path: &Path) -> Result<f64, String>;
}

#[derive(Debug, Clone, Copy)]
pub struct FfprobeProbe {
    pub timeout: Duration,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl MediaProbe for FfprobeProbe {
    fn duration_seconds(&self, path: &Path) -> Result<f64, String> {
        let mut child = Command::new("ffprobe")
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("run ffprobe: {e}"))?;

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(|e| format!("wait ffprobe: {e}"))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!(
                    "ffprobe timed out after {}",
                    humantime::format_duration(self.timeout)
                ));
            }
        };

        if !status.success() {
            return Err(format!(
                "ffprobe exited with code {}",
                status.code().unwrap_or(1)
            ));
        }

        let mut out = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut out)
                .map_err(|e| format!("read ffprobe output: {e}"))?;
        }

        out.trim()
            .parse::<f64>()
            .map_err(|_| format!("unexpected ffprobe output {:?}", out.trim()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct InputMetrics {
    size: Option<u64>,
    characters: Option<u64>,
    words: Option<u64>,
}

pub struct ValidationRunner {
    probe: Box<dyn MediaProbe>,
    stream_output: bool,
}

impl ValidationRunner {
    pub fn new(probe: Box<dyn MediaProbe>) -> Self {
        Self {
            probe,
            stream_output: false,
        }
    }

    /// Mirror the validation command's output to the terminal while it runs.
    pub fn stream_output(mut self, enabled: bool) -> Self {
        self.stream_output = enabled;
        self
    }

    pub fn run(&self, spec: &ValidationSpec, input_override: Option<&str>) -> TestRunResult {
        let input = input_override.unwrap_or(&spec.input).to_string();
        let args: Vec<String> = match input_override {
            Some(custom) => spec
                .command
                .iter()
                .map(|arg| {
                    if *arg == spec.input {
                        custom.to_string()
                    } else {
                        arg.clone()
                    }
                })
                .collect(),
            None => spec.command.clone(),
        };
        let command_preview = args.join(" ");

        let input_path = resolve(&spec.dir, &input);
        let metrics = measure_input(&input_path);

        tracing::info!(command = %command_preview, input = %input, "validation started");

        let req = Request {
            name: "validation".to_string(),
            command_preview: command_preview.clone(),
            use_shell: false,
            exec: args,
            shell: String::new(),
            dir: spec.dir.to_string_lossy().into_owned(),
            env: [("FORCE_COLOR".to_string(), "1".to_string())].into(),
            stream_output: self.stream_output,
        };

        let (result, error) = match runner::execute(&req, |_| {}) {
            Ok(result) if result.success() => (result, None),
            Ok(result) => {
                let message = format!("command failed with exit code {}", result.exit_code);
                (result, Some(message))
            }
            Err(failure) => (failure.result, Some(failure.message)),
        };

        let duration_ms = result.duration.as_secs_f64() * 1000.0;
        let seconds = duration_ms / 1000.0;

        let output_dir = resolve(&spec.dir, &spec.output_dir);
        let output = find_output_file(&output_dir, &input, spec.kind);
        let output_size = output
            .as_deref()
            .and_then(|path| fs::metadata(path).ok())
            .map(|meta| meta.len());

        let output_duration_seconds = match (&output, spec.kind) {
            (Some(path), ArtifactKind::Audio) => match self.probe.duration_seconds(path) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "could not probe audio duration");
                    None
                }
            },
            _ => None,
        };

        if output.is_none() {
            tracing::warn!(dir = %output_dir.display(), kind = spec.kind.as_str(), "no output artifact found");
        }

        TestRunResult {
            command: command_preview,
            input_file: input,
            input_size: metrics.size,
            input_characters: metrics.characters,
            input_words: metrics.words,
            output_file: output.map(|path| display_relative(&spec.dir, &path)),
            output_size,
            output_duration_seconds,
            started_at: result.started_at,
            ended_at: result.ended_at,
            duration_ms,
            exit_code: result.exit_code,
            success: error.is_none(),
            error,
            stdout: result.stdout,
            stderr: result.stderr,
            characters_per_second: rate(metrics.characters, seconds),
            words_per_second: rate(metrics.words, seconds),
            real_time_ratio: output_duration_seconds
                .filter(|_| seconds > 0.0)
                .map(|audio| audio / seconds),
        }
    }
}

/// Locates the artifact produced for `input` inside `output_dir`: a file named
/// after the input stem with an expected extension, otherwise the most recently
/// modified file with an expected extension.
pub fn find_output_file(output_dir: &Path, input: &str, kind: ArtifactKind) -> Option<PathBuf> {
    let stem = Path::new(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidates: Vec<(PathBuf, SystemTime)> = fs::read_dir(output_dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() || !kind.accepts(&entry.path()) {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((entry.path(), modified))
        })
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let by_name = candidates.iter().find(|(path, _)| {
        path.file_name()
            .map(|name| name.to_string_lossy().starts_with(&stem))
            .unwrap_or(false)
    });
    if let Some((path, _)) = by_name {
        return Some(path.clone());
    }

    candidates
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

fn measure_input(path: &Path) -> InputMetrics {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not read validation input");
            return InputMetrics::default();
        }
    };

    match fs::read_to_string(path) {
        Ok(text) => InputMetrics {
            size: Some(size),
            characters: Some(text.chars().count() as u64),
            words: Some(text.split_whitespace().count() as u64),
        },
        Err(_) => InputMetrics {
            size: Some(size),
            ..InputMetrics::default()
        },
    }
}

fn rate(count: Option<u64>, seconds: f64) -> Option<f64> {
    if seconds <= 0.0 {
        return None;
    }
    count.map(|n| n as f64 / seconds)
}

fn resolve(dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() || dir.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

fn display_relative(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub name: String,
    pub command_preview: String,
    pub use_shell: bool,
    pub exec: Vec<String>,
    pub shell: String,
    pub dir: String,
    pub env: HashMap<String, String>,
    pub stream_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn is_stderr(self) -> bool {
        self == Stream::Stderr
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
    /// False only for a final fragment that reached EOF without a newline.
    pub terminated: bool,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
    pub duration: Duration,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct RunFailure {
    pub result: RunResult,
    pub message: String,
}

/// Spawns the request and hands every output line to `on_line` in arrival
/// order. Both streams are drained before the child is reaped.
///
/// A nonzero exit is not a failure here; `Err` means the command could not be
/// started or observed at all.
pub fn execute(
    req: &Request,
    mut on_line: impl FnMut(&OutputLine),
) -> Result<RunResult, RunFailure> {
    if req.use_shell && req.shell.trim().is_empty() {
        return Err(spawn_failure("shell command is required"));
    }

    if !req.use_shell && req.exec.is_empty() {
        return Err(spawn_failure("exec command is required"));
    }

    let started_at = OffsetDateTime::now_utc();
    let wall = Instant::now();

    let mut command = build_command(req).map_err(spawn_failure)?;
    if !req.dir.is_empty() {
        command.current_dir(&req.dir);
    }
    if !req.env.is_empty() {
        command.envs(&req.env);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| spawn_failure(format!("run command: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_failure("failed to capture command output"));
    };

    let (tx, rx) = mpsc::channel::<OutputLine>();
    let readers = [
        spawn_reader(stdout, Stream::Stdout, tx.clone()),
        spawn_reader(stderr, Stream::Stderr, tx),
    ];

    let mut captured_out = String::new();
    let mut captured_err = String::new();

    // Ends once both readers hit EOF and drop their senders.
    for line in rx {
        let buf = match line.stream {
            Stream::Stdout => &mut captured_out,
            Stream::Stderr => &mut captured_err,
        };
        buf.push_str(&line.text);
        if line.terminated {
            buf.push('\n');
        }

        if req.stream_output {
            mirror(&line);
        }

        on_line(&line);
    }

    for reader in readers {
        if reader.join().is_err() {
            tracing::warn!(command = %req.command_preview, "output reader thread panicked");
        }
    }

    let status = child.wait().map_err(|e| RunFailure {
        result: RunResult {
            started_at,
            ended_at: OffsetDateTime::now_utc(),
            duration: wall.elapsed(),
            exit_code: 127,
            stdout: captured_out.clone(),
            stderr: captured_err.clone(),
        },
        message: format!("wait command: {e}"),
    })?;

    Ok(RunResult {
        started_at,
        ended_at: OffsetDateTime::now_utc(),
        duration: wall.elapsed(),
        exit_code: status.code().unwrap_or(1),
        stdout: captured_out,
        stderr: captured_err,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    stream: Stream,
    tx: mpsc::Sender<OutputLine>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::with_capacity(4096);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }

            let terminated = buf.last() == Some(&b'\n');
            if terminated {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }

            let line = OutputLine {
                stream,
                text: String::from_utf8_lossy(&buf).into_owned(),
                terminated,
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

fn mirror(line: &OutputLine) {
    match line.stream {
        Stream::Stdout => {
            let mut sink = std::io::stdout().lock();
            let _ = writeln!(sink, "{}", line.text);
            let _ = sink.flush();
        }
        Stream::Stderr => {
            let mut sink = std::io::stderr().lock();
            let _ = writeln!(sink, "{}", line.text);
            let _ = sink.flush();
        }
    }
}

fn build_command(req: &Request) -> Result<Command, String> {
    if req.use_shell {
        if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&req.shell);
            return Ok(cmd);
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(&req.shell);
        return Ok(cmd);
    }

    let Some(program) = req.exec.first() else {
        return Err("exec command is required".to_string());
    };

    let mut cmd = Command::new(program);
    if req.exec.len() > 1 {
        cmd.args(&req.exec[1..]);
    }
    Ok(cmd)
}

fn spawn_failure(message: impl Into<String>) -> RunFailure {
    let now = OffsetDateTime::now_utc();
    RunFailure {
        result: RunResult {
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            exit_code: 127,
            stdout: String::new(),
            stderr: String::new(),
        },
        message: message.into(),
    }
}

pub fn tail(input: &str, line_limit: usize, char_limit: usize) -> Option<String> {
    if input.is_empty() {
        return None;
    }

    let trimmed = input.trim_end_matches('\n');
    if trimmed.is_empty() {
        return None;
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() > line_limit {
        lines = lines.split_off(lines.len() - line_limit);
    }

    let mut out = lines.join("\n");

    if out.chars().count() > char_limit {
        let start = out.chars().count().saturating_sub(char_limit);
        out = out.chars().skip(start).collect();
    }

    Some(out)
}

use setup_report::validation::{
    ArtifactKind, MediaProbe, ValidationRunner, ValidationSpec, find_output_file,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

struct FixedProbe {
    seconds: Result<f64, String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FixedProbe {
    fn boxed(seconds: Result<f64, String>) -> (Box<dyn MediaProbe>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let probe = FixedProbe {
            seconds,
            calls: Arc::clone(&calls),
        };
        (Box::new(probe), calls)
    }
}

impl MediaProbe for FixedProbe {
    fn duration_seconds(&self, path: &Path) -> Result<f64, String> {
        self.calls
            .lock()
            .expect("lock")
            .push(path.display().to_string());
        self.seconds.clone()
    }
}

fn spec(dir: &Path, kind: ArtifactKind, script: &str) -> ValidationSpec {
    ValidationSpec {
        kind,
        input: "sample.txt".to_string(),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "validate".to_string(),
            "sample.txt".to_string(),
        ],
        output_dir: "output".to_string(),
        dir: dir.to_path_buf(),
    }
}

#[test]
fn audio_validation_measures_input_output_and_rates() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("sample.txt"), "hello big world").expect("write input");
    let (probe, calls) = FixedProbe::boxed(Ok(2.0));

    let result = ValidationRunner::new(probe).run(
        &spec(
            tmp.path(),
            ArtifactKind::Audio,
            "mkdir -p output && printf 'RIFF' > output/sample.wav && echo done",
        ),
        None,
    );

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.exit_code, 0);
    assert!(result.error.is_none());
    assert_eq!(result.input_file, "sample.txt");
    assert_eq!(result.input_size, Some(15));
    assert_eq!(result.input_characters, Some(15));
    assert_eq!(result.input_words, Some(3));
    assert_eq!(result.output_file.as_deref(), Some("output/sample.wav"));
    assert_eq!(result.output_size, Some(4));
    assert_eq!(result.output_duration_seconds, Some(2.0));
    assert_eq!(result.stdout, "done\n");
    assert_eq!(calls.lock().expect("lock").len(), 1);

    let seconds = result.duration_ms / 1000.0;
    let cps = result.characters_per_second.expect("cps");
    assert!((cps - 15.0 / seconds).abs() < 1e-6);
    let ratio = result.real_time_ratio.expect("ratio");
    assert!((ratio - 2.0 / seconds).abs() < 1e-6);
    assert!(result.command.starts_with("/bin/sh -c"));
}

#[test]
fn failing_command_records_exit_code() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("sample.txt"), "text").expect("write input");
    let (probe, calls) = FixedProbe::boxed(Ok(1.0));

    let result = ValidationRunner::new(probe).run(
        &spec(tmp.path(), ArtifactKind::Audio, "echo nope >&2; exit 3"),
        None,
    );

    assert!(!result.success);
    assert_eq!(result.exit_code, 3);
    assert_eq!(
        result.error.as_deref(),
        Some("command failed with exit code 3")
    );
    assert_eq!(result.stderr, "nope\n");
    assert!(result.output_file.is_none());
    assert!(result.real_time_ratio.is_none());
    assert!(calls.lock().expect("lock").is_empty());
}

#[test]
fn missing_input_omits_input_metrics() {
    let tmp = TempDir::new().expect("tempdir");
    let (probe, _) = FixedProbe::boxed(Ok(1.0));

    let result = ValidationRunner::new(probe).run(
        &spec(tmp.path(), ArtifactKind::Text, "true"),
        None,
    );

    assert!(result.success);
    assert_eq!(result.input_size, None);
    assert_eq!(result.input_characters, None);
    assert_eq!(result.characters_per_second, None);
    assert_eq!(result.words_per_second, None);
}

#[test]
fn input_override_replaces_matching_arguments() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("custom.txt"), "one two").expect("write input");
    let (probe, _) = FixedProbe::boxed(Ok(1.0));

    let result = ValidationRunner::new(probe).run(
        &spec(
            tmp.path(),
            ArtifactKind::Text,
            "mkdir -p output && cp \"$1\" output/custom.txt",
        ),
        Some("custom.txt"),
    );

    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.input_file, "custom.txt");
    assert!(result.command.ends_with("validate custom.txt"));
    assert_eq!(result.input_words, Some(2));
    assert_eq!(result.output_file.as_deref(), Some("output/custom.txt"));
    assert!(result.output_duration_seconds.is_none());
}

#[test]
fn probe_failure_leaves_duration_unknown() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("sample.txt"), "text").expect("write input");
    let (probe, _) = FixedProbe::boxed(Err("ffprobe missing".to_string()));

    let result = ValidationRunner::new(probe).run(
        &spec(
            tmp.path(),
            ArtifactKind::Audio,
            "mkdir -p output && printf x > output/sample.mp3",
        ),
        None,
    );

    assert!(result.success);
    assert_eq!(result.output_file.as_deref(), Some("output/sample.mp3"));
    assert!(result.output_duration_seconds.is_none());
    assert!(result.real_time_ratio.is_none());
}

#[test]
fn spawn_failure_is_reported_as_error() {
    let tmp = TempDir::new().expect("tempdir");
    let (probe, _) = FixedProbe::boxed(Ok(1.0));
    let mut spec = spec(tmp.path(), ArtifactKind::Text, "");
    spec.command = vec!["definitely-not-a-real-binary-xyz".to_string()];

    let result = ValidationRunner::new(probe).run(&spec, None);

    assert!(!result.success);
    assert_eq!(result.exit_code, 127);
    assert!(result.error.as_deref().unwrap_or_default().contains("run command"));
}

#[test]
fn find_output_file_prefers_input_stem() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("other.wav"), "a").expect("write");
    thread::sleep(Duration::from_millis(20));
    fs::write(tmp.path().join("sample-take1.wav"), "b").expect("write");
    thread::sleep(Duration::from_millis(20));
    fs::write(tmp.path().join("newest.wav"), "c").expect("write");
    fs::write(tmp.path().join("sample.txt"), "not audio").expect("write");

    let found = find_output_file(tmp.path(), "inputs/sample.txt", ArtifactKind::Audio);
    assert_eq!(found, Some(tmp.path().join("sample-take1.wav")));
}

#[test]
fn find_output_file_falls_back_to_newest() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("a.txt"), "a").expect("write");
    thread::sleep(Duration::from_millis(20));
    fs::write(tmp.path().join("b.md"), "b").expect("write");
    fs::write(tmp.path().join("c.wav"), "c").expect("write");

    let found = find_output_file(tmp.path(), "sample.wav", ArtifactKind::Text);
    assert_eq!(found, Some(tmp.path().join("b.md")));
    assert_eq!(
        find_output_file(&tmp.path().join("missing"), "x", ArtifactKind::Text),
        None
    );
}

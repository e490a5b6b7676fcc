use setup_report::config::{
    self, Config, Setup, Storage, Timing, Validation, expand_variables, load, resolve_inline,
    validate,
};
use setup_report::validation::ArtifactKind;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn with_setup(name: &str, setup: Setup) -> Config {
    Config {
        setups: BTreeMap::from([(name.to_string(), setup)]),
        ..Config::default()
    }
}

#[test]
fn default_config_is_valid() {
    assert!(validate(&Config::default()).is_ok());
}

#[test]
fn validate_rejects_setup_with_exec_and_run() {
    let cfg = with_setup(
        "setup:tts",
        Setup {
            exec: vec!["./setup.sh".to_string()],
            run: "./setup.sh".to_string(),
            ..Setup::default()
        },
    );

    let err = validate(&cfg).expect_err("expected validation error");
    assert!(err.to_string().contains("exactly one of exec or run"));
}

#[test]
fn validate_rejects_setup_without_command() {
    let cfg = with_setup(
        "setup:tts",
        Setup {
            description: "nothing to run".to_string(),
            ..Setup::default()
        },
    );

    assert!(validate(&cfg).is_err());
}

#[test]
fn validate_rejects_bad_names_paths_and_durations() {
    let mut cfg = with_setup(
        "-bad name",
        Setup {
            run: "true".to_string(),
            markers: vec!["../escape.done".to_string()],
            ..Setup::default()
        },
    );
    cfg.version = 2;
    cfg.watch.roots = vec!["/abs/models".to_string()];
    cfg.timing = Timing {
        debounce: "soon".to_string(),
        ..Timing::default()
    };
    cfg.storage = Storage {
        largest_files: Some(0),
    };

    let err = validate(&cfg).expect_err("expected validation errors");
    let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
    assert!(fields.contains(&"version"));
    assert!(fields.contains(&"watch.roots[0]"));
    assert!(fields.contains(&"timing.debounce"));
    assert!(fields.contains(&"storage.largest_files"));
    assert!(fields.contains(&"setups.-bad name"));
    assert!(fields.contains(&"setups.-bad name.markers[0]"));
}

#[test]
fn validate_checks_validation_block() {
    let cfg = with_setup(
        "setup:tts",
        Setup {
            run: "./setup.sh".to_string(),
            validation: Some(Validation {
                kind: "video".to_string(),
                ..Validation::default()
            }),
            ..Setup::default()
        },
    );

    let err = validate(&cfg).expect_err("expected validation errors");
    let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
    assert_eq!(
        fields,
        vec![
            "setups.setup:tts.validation.type",
            "setups.setup:tts.validation.input",
            "setups.setup:tts.validation.exec",
        ]
    );
}

#[test]
fn settings_apply_defaults_relative_to_cwd() {
    let settings = Config::default()
        .settings(Path::new("/work"))
        .expect("settings");

    assert_eq!(settings.base_dir, Path::new("/work"));
    assert_eq!(settings.roots.len(), config::DEFAULT_ROOTS.len());
    assert_eq!(settings.reports_dir, Path::new("/work/reports"));
    assert_eq!(settings.markers_dir, Path::new("/work/build/config"));
    assert_eq!(settings.debounce, Duration::from_millis(100));
    assert_eq!(settings.settle, Duration::from_millis(500));
    assert_eq!(settings.probe_timeout, Duration::from_secs(10));
    assert_eq!(settings.largest_files, 10);
}

#[test]
fn settings_honor_overrides() {
    let mut cfg = Config::default();
    cfg.watch.base_dir = "project".to_string();
    cfg.watch.roots = vec!["build/models".to_string()];
    cfg.reports.dir = "/var/reports".to_string();
    cfg.timing.settle = "0s".to_string();
    cfg.storage.largest_files = Some(3);

    let settings = cfg.settings(Path::new("/work")).expect("settings");
    assert_eq!(settings.base_dir, Path::new("/work/project"));
    assert_eq!(settings.roots, vec!["build/models".to_string()]);
    assert_eq!(settings.reports_dir, Path::new("/var/reports"));
    assert_eq!(settings.settle, Duration::ZERO);
    assert_eq!(settings.tracker().largest_files, 3);
}

#[test]
fn resolve_setup_builds_display_name_and_validation() {
    let cfg = with_setup(
        "setup:tts",
        Setup {
            run: "./setup.sh tts".to_string(),
            env: HashMap::from([
                ("A_DIR".to_string(), "models".to_string()),
                ("B_PATH".to_string(), "${A_DIR}/tts".to_string()),
            ]),
            markers: vec!["tts.done".to_string()],
            validation: Some(Validation {
                kind: "audio".to_string(),
                input: "inputs/sample.txt".to_string(),
                exec: vec!["./speak".to_string(), "inputs/sample.txt".to_string()],
                output_dir: String::new(),
            }),
            ..Setup::default()
        },
    );
    let settings = cfg.settings(Path::new("/work")).expect("settings");

    let resolved = cfg.resolve_setup("setup:tts", &settings).expect("resolve");
    assert_eq!(resolved.name, "setup:tts");
    assert_eq!(resolved.display_name, "tts");
    assert!(resolved.use_shell);
    assert_eq!(resolved.command_preview, "./setup.sh tts");
    assert_eq!(resolved.env["B_PATH"], "models/tts");
    assert_eq!(resolved.markers, vec!["tts.done".to_string()]);

    let spec = resolved.validation.expect("validation");
    assert_eq!(spec.kind, ArtifactKind::Audio);
    assert_eq!(spec.output_dir, "output");
    assert_eq!(spec.dir, Path::new("/work"));
}

#[test]
fn resolve_setup_lists_known_names() {
    let cfg = with_setup(
        "setup:tts",
        Setup {
            exec: vec!["true".to_string()],
            ..Setup::default()
        },
    );
    let settings = cfg.settings(Path::new("/work")).expect("settings");

    let err = cfg
        .resolve_setup("setup:asr", &settings)
        .expect_err("expected missing setup");
    assert!(err.contains("known: setup:tts"));
}

#[test]
fn resolve_inline_names_after_program() {
    let args = vec!["./install.sh".to_string(), "--all".to_string()];

    let resolved = resolve_inline(&args, "").expect("resolve inline");
    assert_eq!(resolved.name, "./install.sh");
    assert_eq!(resolved.command_preview, "./install.sh --all");
    assert!(!resolved.use_shell);
    assert!(resolved.validation.is_none());

    let named = resolve_inline(&args, "setup:all").expect("resolve inline");
    assert_eq!(named.display_name, "all");

    assert!(resolve_inline(&[], "").is_err());
}

#[test]
fn expand_variables_keeps_unknown_tokens() {
    let lookup = HashMap::from([("HOME".to_string(), "/home/me".to_string())]);

    assert_eq!(expand_variables("$HOME/.cache", &lookup), "/home/me/.cache");
    assert_eq!(expand_variables("${HOME}x", &lookup), "/home/mex");
    assert_eq!(expand_variables("$NOPE and ${NOPE}", &lookup), "${NOPE} and ${NOPE}");
    assert_eq!(expand_variables("cost: $5", &lookup), "cost: $5");
}

#[test]
fn load_rejects_unknown_field() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("setup-report.yml");

    fs::write(
        &path,
        r#"version: 1
setups:
  setup:tts:
    run: ./setup.sh
    unexpected: true
"#,
    )
    .expect("write config");

    assert!(load(&path).is_err());
}

#[test]
fn load_reads_full_config() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("setup-report.yml");

    fs::write(
        &path,
        r#"version: 1
watch:
  roots: [build/models, build/venvs]
timing:
  debounce: 50ms
setups:
  setup:transcription:
    description: speech to text
    exec: ["./setup.sh", "transcription"]
    markers: [transcription.done]
    validation:
      type: text
      input: inputs/sample.wav
      exec: ["./transcribe", "inputs/sample.wav"]
"#,
    )
    .expect("write config");

    let cfg = load(&path).expect("load config");
    let setup = &cfg.setups["setup:transcription"];
    assert_eq!(setup.exec, vec!["./setup.sh", "transcription"]);
    assert_eq!(setup.validation.as_ref().expect("validation").kind, "text");

    let settings = cfg.settings(dir.path()).expect("settings");
    assert_eq!(settings.debounce, Duration::from_millis(50));
    assert_eq!(settings.roots.len(), 2);
}

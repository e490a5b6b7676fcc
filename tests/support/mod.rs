use setup_report::model::{
    Download, Environment, ErrorRecord, Phase, Report, StorageMetrics, TestRunResult,
};
use setup_report::report::{self, ReportInputs};
use std::collections::BTreeMap;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub fn started() -> OffsetDateTime {
    datetime!(2026-01-30 10:00:00 UTC)
}

pub fn inputs(command: &str) -> ReportInputs {
    let started_at = started();
    ReportInputs {
        command: command.to_string(),
        setup_command: command.to_string(),
        started_at,
        ended_at: started_at + Duration::seconds(90),
        duration_ms: 90_000,
        exit_code: 0,
        fresh_run: false,
        phases: vec![Phase {
            name: "Installing deps".to_string(),
            started_at,
            ended_at: Some(started_at + Duration::seconds(30)),
            duration_ms: Some(30_000),
            success: true,
        }],
        file_operations: Vec::new(),
        downloads: vec![Download::new("https://example.com/repo.git")],
        errors: Vec::new(),
        storage: StorageMetrics {
            total_bytes_added: 2048,
            total_bytes_modified: 0,
            by_directory: BTreeMap::from([("build/models".to_string(), 2048)]),
            largest_files: Vec::new(),
        },
        test_run: None,
        environment: Environment {
            platform: "linux".to_string(),
            arch: "x86_64".to_string(),
            tool_version: "1.0.0".to_string(),
            cwd: "/work".to_string(),
        },
        stdout: "hello\n".to_string(),
        stderr: String::new(),
    }
}

pub fn report(command: &str) -> Report {
    report::build(inputs(command)).expect("build report")
}

pub fn test_run(duration_ms: f64, chars_per_second: Option<f64>) -> TestRunResult {
    TestRunResult {
        command: "./speak sample.txt".to_string(),
        input_file: "sample.txt".to_string(),
        input_size: Some(120),
        input_characters: Some(100),
        input_words: Some(20),
        output_file: Some("output/sample.wav".to_string()),
        output_size: Some(4096),
        output_duration_seconds: Some(4.0),
        started_at: started(),
        ended_at: started() + Duration::milliseconds(duration_ms as i64),
        duration_ms,
        exit_code: 0,
        success: true,
        error: None,
        stdout: String::new(),
        stderr: String::new(),
        characters_per_second: chars_per_second,
        words_per_second: Some(2.0),
        real_time_ratio: Some(0.4),
    }
}

pub fn error(message: &str) -> ErrorRecord {
    ErrorRecord {
        timestamp: started(),
        message: message.to_string(),
        context: message.to_string(),
    }
}

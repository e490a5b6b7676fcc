use setup_report::model::DownloadKind;
use setup_report::parser::{LogParser, dedupe_downloads};
use setup_report::runner::Stream;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

fn now() -> OffsetDateTime {
    datetime!(2026-01-30 12:00:00 UTC)
}

fn feed(parser: &mut LogParser, lines: &[&str]) {
    for (i, line) in lines.iter().enumerate() {
        parser.parse_line_at(line, Stream::Stdout, now() + Duration::milliseconds(i as i64));
    }
}

fn urls(parser: &LogParser) -> Vec<String> {
    parser.downloads().into_iter().map(|d| d.url).collect()
}

#[test]
fn completion_closes_phase_using_log_clock() {
    let mut parser = LogParser::new();
    feed(
        &mut parser,
        &[
            "[12:00:00.000] Installing foo...",
            "[12:00:05.000] Installed foo successfully",
        ],
    );

    assert!(parser.open_phase().is_none());
    let phases = parser.phases();
    assert_eq!(phases.len(), 1);
    assert_eq!(phases[0].name, "Installing foo");
    assert_eq!(phases[0].duration_ms, Some(5000));
    assert!(phases[0].success);
    assert_eq!(
        phases[0].ended_at,
        Some(phases[0].started_at + Duration::seconds(5))
    );
}

#[test]
fn new_action_closes_previous_phase() {
    let mut parser = LogParser::new();
    feed(
        &mut parser,
        &[
            "[10:00:00.000] Cloning repo…",
            "[10:00:01.500] Building wheels...",
        ],
    );

    assert_eq!(parser.phases().len(), 1);
    assert_eq!(parser.phases()[0].name, "Cloning repo");
    assert_eq!(parser.phases()[0].duration_ms, Some(1500));

    let open = parser.open_phase().expect("open phase");
    assert_eq!(open.name, "Building wheels");
}

#[test]
fn failure_wording_marks_phase_failed() {
    let mut parser = LogParser::new();
    feed(
        &mut parser,
        &[
            "[10:00:00.000] Downloading model",
            "[10:00:02.000] Download failed with error, done",
        ],
    );

    assert_eq!(parser.phases().len(), 1);
    assert!(!parser.phases()[0].success);
}

#[test]
fn completion_without_open_phase_is_ignored() {
    let mut parser = LogParser::new();
    feed(&mut parser, &["[10:00:00.000] Setup completed"]);

    assert!(parser.phases().is_empty());
    assert!(parser.open_phase().is_none());
}

#[test]
fn phase_duration_wraps_past_midnight() {
    let mut parser = LogParser::new();
    feed(
        &mut parser,
        &["[23:59:59.000] Compiling kernel", "[00:00:01.000] Finished"],
    );

    assert_eq!(parser.phases()[0].duration_ms, Some(2000));
}

#[test]
fn untimestamped_lines_do_not_change_phase_state() {
    let mut parser = LogParser::new();
    feed(&mut parser, &["Installing foo...", "Installed foo successfully"]);

    assert!(parser.phases().is_empty());
    assert!(parser.open_phase().is_none());
}

#[test]
fn finalize_closes_open_phase_successfully() {
    let mut parser = LogParser::new();
    parser.parse_line_at("[09:00:00.000] Setting up venv", Stream::Stdout, now());
    assert!(parser.open_phase().is_some());

    parser.finalize_at(now() + Duration::seconds(3));

    assert!(parser.open_phase().is_none());
    let phase = &parser.phases()[0];
    assert_eq!(phase.duration_ms, Some(3000));
    assert!(phase.success);
    assert!(!phase.is_open());
}

#[test]
fn at_most_one_phase_is_open() {
    let mut parser = LogParser::new();
    for line in [
        "[01:00:00.000] Installing a",
        "[01:00:01.000] Installing b",
        "[01:00:02.000] Checking c",
        "[01:00:03.000] Updating d",
    ] {
        parser.parse_line_at(line, Stream::Stdout, now());
        assert!(parser.phases().iter().all(|p| !p.is_open()));
    }

    assert_eq!(parser.phases().len(), 3);
    parser.finalize_at(now());
    assert_eq!(parser.phases().len(), 4);
    assert!(parser.open_phase().is_none());
}

#[test]
fn line_with_error_and_warning_is_not_an_error() {
    let mut parser = LogParser::new();
    parser.parse_line("warning: deprecated error handler", Stream::Stdout);
    parser.parse_line("WARNING: failed to find optional dep", Stream::Stderr);

    assert!(parser.errors().is_empty());
}

#[test]
fn stderr_and_keywords_are_errors() {
    let mut parser = LogParser::new();
    parser.parse_line("some progress on stderr", Stream::Stderr);
    parser.parse_line("Traceback: RuntimeException raised", Stream::Stdout);
    parser.parse_line("all good", Stream::Stdout);
    parser.parse_line("   ", Stream::Stderr);

    let messages: Vec<&str> = parser.errors().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["some progress on stderr", "Traceback: RuntimeException raised"]
    );
}

#[test]
fn error_context_holds_last_five_lines() {
    let mut parser = LogParser::new();
    for i in 1..=7 {
        parser.parse_line(&format!("line {i}"), Stream::Stdout);
    }
    parser.parse_line("  fatal error: boom  ", Stream::Stdout);

    let error = &parser.errors()[0];
    assert_eq!(error.message, "fatal error: boom");
    assert_eq!(
        error.context,
        "line 4\nline 5\nline 6\nline 7\n  fatal error: boom  "
    );
}

#[test]
fn git_clone_twice_yields_one_download() {
    let mut parser = LogParser::new();
    parser.parse_line("git clone https://example.com/x.git", Stream::Stdout);
    parser.parse_line("git clone https://example.com/x.git", Stream::Stdout);

    assert_eq!(parser.raw_downloads().len(), 2);
    assert_eq!(urls(&parser), vec!["https://example.com/x.git"]);
}

#[test]
fn git_clone_over_ssh_is_detected() {
    let mut parser = LogParser::new();
    parser.parse_line(
        "git clone --recursive git@github.com:fishaudio/fish-speech.git build/src/fish",
        Stream::Stdout,
    );

    let downloads = parser.downloads();
    assert_eq!(downloads[0].url, "git@github.com:fishaudio/fish-speech.git");
    assert_eq!(downloads[0].kind(), DownloadKind::Git);
}

#[test]
fn pip_install_yields_one_download_per_package() {
    let mut parser = LogParser::new();
    parser.parse_line(
        "pip install --upgrade torch==2.2.0 'transformers>=4.40' -r requirements.txt",
        Stream::Stdout,
    );

    assert_eq!(
        urls(&parser),
        vec!["pypi:///torch", "pypi:///transformers"]
    );
    assert_eq!(parser.downloads()[0].display_url(), "torch");
    assert_eq!(parser.downloads()[0].kind(), DownloadKind::Package);
}

#[test]
fn pip_install_ignores_local_paths() {
    let mut parser = LogParser::new();
    parser.parse_line("pip3 install -e . ./vendor/pkg", Stream::Stdout);

    assert!(parser.downloads().is_empty());
}

#[test]
fn fetch_tools_and_downloading_lines_are_detected() {
    let mut parser = LogParser::new();
    parser.parse_line(
        "curl -L -o model.bin https://cdn.example.com/model.bin",
        Stream::Stdout,
    );
    parser.parse_line("wget -q 'https://example.org/data.tar.gz'", Stream::Stdout);
    parser.parse_line(
        "  Downloading https://files.pythonhosted.org/packages/numpy.whl (18 MB)",
        Stream::Stdout,
    );

    assert_eq!(
        urls(&parser),
        vec![
            "https://cdn.example.com/model.bin",
            "https://example.org/data.tar.gz",
            "https://files.pythonhosted.org/packages/numpy.whl",
        ]
    );
}

#[test]
fn model_hub_identifiers_need_hub_context() {
    let mut parser = LogParser::new();
    parser.parse_line("copying build/models into place", Stream::Stdout);
    parser.parse_line(
        "snapshot_download(repo_id='Qwen/Qwen3-TTS-0.6B', local_dir=build/models)",
        Stream::Stdout,
    );
    parser.parse_line("huggingface-cli download openai/whisper-base", Stream::Stdout);

    assert_eq!(
        urls(&parser),
        vec![
            "huggingface:///Qwen/Qwen3-TTS-0.6B",
            "huggingface:///build/models",
            "huggingface:///openai/whisper-base",
        ]
    );
    assert!(
        parser
            .downloads()
            .iter()
            .all(|d| d.kind() == DownloadKind::Model)
    );
}

#[test]
fn huggingface_urls_are_models() {
    let mut parser = LogParser::new();
    parser.parse_line(
        "fetching https://huggingface.co/fishaudio/openaudio-s1-mini/resolve/main/model.pth",
        Stream::Stdout,
    );

    let downloads = parser.downloads();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].kind(), DownloadKind::Model);
}

#[test]
fn dedupe_keeps_first_seen_order() {
    let mut parser = LogParser::new();
    for line in [
        "git clone https://example.com/b.git",
        "git clone https://example.com/a.git",
        "git clone https://example.com/b.git",
    ] {
        parser.parse_line(line, Stream::Stdout);
    }

    let unique = dedupe_downloads(parser.raw_downloads());
    let urls: Vec<&str> = unique.iter().map(|d| d.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://example.com/b.git", "https://example.com/a.git"]
    );
}

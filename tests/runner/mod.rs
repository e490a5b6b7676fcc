use setup_report::runner::{OutputLine, Request, Stream, execute, tail};
use std::collections::HashMap;

fn base_request() -> Request {
    Request {
        name: "inline".to_string(),
        command_preview: "echo ok".to_string(),
        use_shell: false,
        exec: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo ok".to_string(),
        ],
        shell: String::new(),
        dir: String::new(),
        env: HashMap::new(),
        stream_output: false,
    }
}

#[test]
fn execute_success() {
    let result = execute(&base_request(), |_| {}).expect("success");
    assert_eq!(result.exit_code, 0);
    assert!(result.success());
    assert_eq!(result.stdout, "ok\n");
}

#[test]
fn execute_nonzero_exit_is_not_an_error() {
    let mut req = base_request();
    req.exec[2] = "echo err >&2; exit 7".to_string();

    let result = execute(&req, |_| {}).expect("observed run");
    assert_eq!(result.exit_code, 7);
    assert!(!result.success());
    assert_eq!(result.stderr, "err\n");
}

#[test]
fn execute_delivers_lines_with_their_stream() {
    let mut req = base_request();
    req.exec[2] = "echo one; echo two >&2; printf three".to_string();

    let mut lines: Vec<OutputLine> = Vec::new();
    let result = execute(&req, |line| lines.push(line.clone())).expect("run");

    let stdout: Vec<&str> = lines
        .iter()
        .filter(|l| l.stream == Stream::Stdout)
        .map(|l| l.text.as_str())
        .collect();
    let stderr: Vec<&str> = lines
        .iter()
        .filter(|l| l.stream == Stream::Stderr)
        .map(|l| l.text.as_str())
        .collect();

    assert_eq!(stdout, vec!["one", "three"]);
    assert_eq!(stderr, vec!["two"]);
    assert!(!lines.iter().any(|l| l.text == "three" && l.terminated));
    assert_eq!(result.stdout, "one\nthree");
}

#[test]
fn execute_shell_mode_passes_env() {
    let mut req = base_request();
    req.use_shell = true;
    req.exec.clear();
    req.shell = "echo \"$GREETING\"".to_string();
    req.env.insert("GREETING".to_string(), "hello".to_string());

    let result = execute(&req, |_| {}).expect("run");
    assert_eq!(result.stdout, "hello\n");
}

#[test]
fn execute_missing_program_fails_with_127() {
    let mut req = base_request();
    req.exec = vec!["definitely-not-a-real-binary-xyz".to_string()];

    let err = execute(&req, |_| {}).expect_err("spawn failure");
    assert_eq!(err.result.exit_code, 127);
    assert!(err.message.contains("run command"));
}

#[test]
fn execute_requires_a_command() {
    let mut req = base_request();
    req.exec.clear();

    let err = execute(&req, |_| {}).expect_err("no command");
    assert_eq!(err.message, "exec command is required");
}

#[test]
fn tail_limits_output() {
    let input = "l1\nl2\nl3\nl4\n";
    let got = tail(input, 2, 100).expect("tail");
    assert_eq!(got, "l3\nl4");
}

#[test]
fn tail_of_empty_output_is_none() {
    assert_eq!(tail("", 5, 100), None);
    assert_eq!(tail("\n\n", 5, 100), None);
}

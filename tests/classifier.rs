// ABOUTME: Integration tests for command result classification.
// ABOUTME: Labelled output fixtures, benign noise, and the word scan on clean exits.

use pvelab::classify::{Classifier, ErrorKind, NoiseFilter};

fn classify(output: &str, exit_code: i32) -> ErrorKind {
    Classifier::default()
        .classify(Some(output), Some(exit_code))
        .error_kind
}

/// Test: every labelled fixture maps to exactly its kind
#[test]
fn fixtures_map_to_expected_kinds() {
    let fixtures: &[(&str, i32, ErrorKind)] = &[
        ("Setting up foo-pkg ...\nProcessing triggers for libc ...\n", 0, ErrorKind::None),
        ("E: Unable to locate package foo\n", 100, ErrorKind::PackageError),
        ("ssh: connect to host 10.0.0.5 port 22: Connection refused\n", 255, ErrorKind::ConnectionError),
        ("mkdir: cannot create directory '/root/x': Permission denied\n", 1, ErrorKind::PermissionDenied),
        ("bash: line 1: nosuchcmd: command not found\n", 127, ErrorKind::NotFound),
        ("volume create: shared: failed: Volume shared already exists\n", 1, ErrorKind::AlreadyExists),
        ("write error: No space left on device\n", 1, ErrorKind::ResourceExhausted),
        ("Job for nginx.service failed because the control process exited\n", 1, ErrorKind::ServiceError),
        ("Err:1 http://archive.ubuntu.com noble InRelease\n  Failed to fetch\n", 100, ErrorKind::PackageError),
        ("ping: connect: Network is unreachable\n", 2, ErrorKind::NetworkError),
        ("operation timed out after 30s\n", 1, ErrorKind::Timeout),
        ("something odd happened\n", 3, ErrorKind::CommandFailed),
    ];

    for (output, code, expected) in fixtures {
        assert_eq!(classify(output, *code), *expected, "fixture: {output:?} (exit {code})");
    }
}

/// Test: benign log lines never flip a success into a failure
#[test]
fn benign_noise_keeps_success() {
    let output = "logger: socket /dev/log: No such file or directory\n\
                  perl: warning: Setting locale failed.\n\
                  locale: Cannot set LC_ALL to default locale\n\
                  Setting up curl (8.5.0) ...\n";
    let result = Classifier::default().classify(Some(output), Some(0));
    assert!(result.success, "{:?}", result);
    assert_eq!(result.error_kind, ErrorKind::None);
    assert_eq!(result.output.as_deref(), Some(output), "raw output is kept");
}

/// Test: AppArmor profile boilerplate is noise
#[test]
fn apparmor_boilerplate_is_noise() {
    let output = "Error: At least one profile failed to load\nunpacked ok\n";
    assert_eq!(classify(output, 0), ErrorKind::None);
}

/// Test: a clean exit that prints a failure word is still a failure
#[test]
fn word_scan_overrides_clean_exit() {
    let result = Classifier::default().classify(Some("step 3 failed, continuing\n"), Some(0));
    assert!(!result.success);
    assert_eq!(result.error_kind, ErrorKind::CommandFailed);
}

/// Test: the word scan matches whole words only
#[test]
fn word_scan_ignores_partial_words() {
    assert_eq!(classify("errors=0 failures_total=0\n", 0), ErrorKind::None);
}

/// Test: ANSI colour codes do not hide failures
#[test]
fn ansi_escapes_are_stripped() {
    assert_eq!(
        classify("\x1b[31mE: Unable to locate package bar\x1b[0m\n", 100),
        ErrorKind::PackageError
    );
}

/// Test: missing output follows the null-output rules
#[test]
fn null_output() {
    let classifier = Classifier::default();
    assert_eq!(classifier.classify(None, None).error_kind, ErrorKind::Timeout);
    assert_eq!(classifier.classify(None, Some(2)).error_kind, ErrorKind::CommandFailed);
    assert!(!classifier.classify(None, Some(0)).success);
}

/// Test: empty output is success regardless of exit status
#[test]
fn empty_output_is_success() {
    assert!(Classifier::default().classify(Some(""), Some(0)).success);
}

/// Test: configured noise extends the defaults
#[test]
fn configured_noise_prefix() {
    let classifier = Classifier::new(NoiseFilter::default().with_prefix("W: "));
    let result = classifier.classify(Some("W: some index failed to download, using cached\n"), Some(0));
    assert!(result.success);

    let strict = Classifier::new(NoiseFilter::empty());
    let result = strict.classify(Some("W: some index failed to download, using cached\n"), Some(0));
    assert!(!result.success);
}

/// Test: failure messages are taken from the matching line and bounded
#[test]
fn message_comes_from_matching_line() {
    let long_name = "x".repeat(400);
    let output = format!("Reading package lists...\nE: Unable to locate package {long_name}\n");
    let result = Classifier::default().classify(Some(&output), Some(100));
    let message = result.error_message.unwrap();
    assert!(message.starts_with("E: Unable to locate package"));
    assert!(message.chars().count() <= 200);
}

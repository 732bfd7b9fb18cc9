// ABOUTME: Integration tests for the contention-aware package executor.
// ABOUTME: Lock retries, repository fix-up, fail-fast errors, and idempotent cleanup.

mod support;

use pvelab::classify::{Classifier, ErrorKind};
use pvelab::package::{ContentionPolicy, PackageError, PackageExecutor};
use pvelab::transport::ExecutionTarget;
use support::FakeTransport;

const INSTALL: &str = "apt-get install -y curl";
const LOCKED: &str =
    "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 4242 (apt)\n";
const STALE_RELEASE: &str = "E: The repository 'http://archive.ubuntu.com/ubuntu oracular Release' no longer has a Release file.\n";

fn target() -> ExecutionTarget {
    ExecutionTarget::host(support::host_address())
}

async fn install(fake: &FakeTransport, policy: &ContentionPolicy) -> Result<String, PackageError> {
    support::init_tracing();
    let classifier = Classifier::default();
    let target = target();
    PackageExecutor::new(fake, &classifier, &target, policy)
        .execute(INSTALL)
        .await
}

/// Test: a clean install probes once and never cleans up
#[tokio::test]
async fn clean_install_runs_once() {
    let fake = FakeTransport::package_ready();
    fake.respond(INSTALL, "Setting up curl (8.5.0) ...\n", 0);

    let output = install(&fake, &ContentionPolicy::immediate()).await.unwrap();

    assert!(output.contains("Setting up curl"));
    assert_eq!(fake.count(INSTALL), 1);
    assert_eq!(fake.count("locks_held"), 1);
    assert_eq!(fake.count("apt_cleanup_done"), 0);
}

/// Test: lock errors trigger cleanup and a retry until the command succeeds
#[tokio::test]
async fn lock_contention_is_retried() {
    let fake = FakeTransport::package_ready();
    fake.respond_seq(INSTALL, &[(LOCKED, 100), (LOCKED, 100), ("done\n", 0)]);

    let output = install(&fake, &ContentionPolicy::immediate()).await.unwrap();

    assert_eq!(output, "done\n");
    assert_eq!(fake.count(INSTALL), 3);
    assert_eq!(fake.count("apt_cleanup_done"), 2);
}

/// Test: the lock retry budget is bounded
#[tokio::test]
async fn lock_retries_are_exhausted() {
    let fake = FakeTransport::package_ready();
    fake.respond(INSTALL, LOCKED, 100);
    let policy = ContentionPolicy {
        max_retries: 2,
        ..ContentionPolicy::immediate()
    };

    let err = install(&fake, &policy).await.unwrap_err();

    assert!(matches!(err, PackageError::LockRetriesExhausted { attempts: 3, .. }));
    assert_eq!(err.error_kind(), ErrorKind::ResourceExhausted);
    assert_eq!(fake.count(INSTALL), 3);
}

/// Test: a repository error gets one source fix-up and one retry
#[tokio::test]
async fn repository_error_fixed_once() {
    let fake = FakeTransport::package_ready();
    fake.respond_seq(INSTALL, &[(STALE_RELEASE, 100), ("ok\n", 0)]);

    install(&fake, &ContentionPolicy::immediate()).await.unwrap();

    assert_eq!(fake.count(INSTALL), 2);
    assert_eq!(fake.count("sed -i"), 2, "both default rewrites are applied");
    assert_eq!(fake.count("s/oracular/plucky/g"), 1);
}

/// Test: a repository error after the fix-up is fatal
#[tokio::test]
async fn repository_error_after_fixup_is_fatal() {
    let fake = FakeTransport::package_ready();
    fake.respond(INSTALL, STALE_RELEASE, 100);

    let err = install(&fake, &ContentionPolicy::immediate()).await.unwrap_err();

    assert!(matches!(err, PackageError::Repository { .. }));
    assert_eq!(fake.count(INSTALL), 2);
    assert_eq!(fake.count("sed -i"), 2, "sources are rewritten only once");
}

/// Test: other failures return immediately without cleanup
#[tokio::test]
async fn other_failures_fail_fast() {
    let fake = FakeTransport::package_ready();
    fake.respond(INSTALL, "E: Unable to locate package curl\n", 100);

    let err = install(&fake, &ContentionPolicy::immediate()).await.unwrap_err();

    assert_eq!(err.error_kind(), ErrorKind::PackageError);
    assert!(err.output_tail().unwrap().contains("Unable to locate package"));
    assert_eq!(fake.count(INSTALL), 1);
    assert_eq!(fake.count("apt_cleanup_done"), 0);
}

/// Test: a busy package manager is cleaned up once the wait window expires
#[tokio::test]
async fn held_locks_force_cleanup() {
    let fake = FakeTransport::package_ready();
    fake.respond_seq("locks_held", &[("locks_held\n", 0), ("locks_clear\n", 0)]);

    install(&fake, &ContentionPolicy::immediate()).await.unwrap();

    assert_eq!(fake.count("apt_cleanup_done"), 1);
    assert_eq!(fake.count(INSTALL), 1);
}

/// Test: locks that survive forced cleanup abort before the command runs
#[tokio::test]
async fn locks_surviving_cleanup_abort() {
    let fake = FakeTransport::package_ready();
    fake.respond("locks_held", "locks_held\n", 0);

    let err = install(&fake, &ContentionPolicy::immediate()).await.unwrap_err();

    assert!(matches!(err, PackageError::LocksHeld { .. }));
    assert_eq!(fake.count(INSTALL), 0);
}

/// Test: running cleanup twice issues the same tolerant command both times
#[tokio::test]
async fn cleanup_is_idempotent() {
    let fake = FakeTransport::package_ready();
    let classifier = Classifier::default();
    let target = target();
    let policy = ContentionPolicy::immediate();
    let executor = PackageExecutor::new(&fake, &classifier, &target, &policy);

    executor.cleanup().await;
    executor.cleanup().await;

    let commands = fake.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0], commands[1]);
    let cleanup = executor.cleanup_command();
    assert!(cleanup.contains("rm -f /var/lib/dpkg/lock || true"));
    assert!(cleanup.contains("dpkg --configure -a"));
}

/// Test: non-root sessions wrap every package command in sudo
#[tokio::test]
async fn sudo_wraps_commands() {
    let fake = FakeTransport::package_ready();
    let policy = ContentionPolicy {
        use_sudo: true,
        ..ContentionPolicy::immediate()
    };

    install(&fake, &policy).await.unwrap();

    assert!(fake.commands().iter().all(|c| c.starts_with("sudo -n bash -c ")));
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{create_dir_all, write};
use std::path::Path;
use tempfile::tempdir;

const IDENTITY_CONFIG: &str =
    "commit_identity:\n  name: CLI Test\n  email: cli@example.com\n";

fn write_source(root: &Path) {
    create_dir_all(root).unwrap();
    write(root.join("notes.md"), "some notes").unwrap();
    write(root.join("plan 1.0.txt"), "first plan").unwrap();
    write(root.join("plan 2.0.txt"), "second plan").unwrap();
}

fn commit_subjects(repo: &Path) -> Vec<String> {
    let out = std::process::Command::new("git")
        .args(["log", "--reverse", "--format=%s"])
        .current_dir(repo)
        .output()
        .unwrap();
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

fn replay_cmd(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("wiki-versioner").expect("Binary exists");
    cmd.current_dir(workdir).env("RUST_LOG", "info");
    cmd
}

#[test]
fn missing_source_exits_with_failure() {
    let tmp = tempdir().unwrap();
    replay_cmd(tmp.path())
        .arg(tmp.path().join("missing"))
        .arg(tmp.path().join("repo"))
        .arg("--init")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("source directory does not exist"));
    assert!(!tmp.path().join("repo").exists());
}

#[test]
fn non_repository_target_without_init_fails() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("plain-dir");
    write_source(&source);
    create_dir_all(&target).unwrap();

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("not a git repository"));
}

#[test]
fn init_and_replay_creates_history() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("repo");
    let config = tmp.path().join("config.yaml");
    write_source(&source);
    write(&config, IDENTITY_CONFIG).unwrap();

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .arg("--init")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("trace_initialised"));

    assert_eq!(
        commit_subjects(&target),
        ["Add notes.md", "plan.txt version 1.0", "plan.txt version 2.0"]
    );
}

#[test]
fn default_config_is_read_from_working_directory() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("repo");
    write_source(&source);
    write(tmp.path().join("config.yaml"), IDENTITY_CONFIG).unwrap();

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .arg("--init")
        .assert()
        .success();
    assert_eq!(commit_subjects(&target).len(), 3);
}

#[test]
fn ledger_makes_second_run_a_no_op() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("repo");
    let config = tmp.path().join("config.yaml");
    let db = tmp.path().join("export.db");
    write_source(&source);
    write(&config, IDENTITY_CONFIG).unwrap();
    let database_url = format!("sqlite://{}", db.display());

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .args(["--init", "--database-url", &database_url])
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .args(["--database-url", &database_url])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Skipped files already committed according to the ledger",
        ));

    assert_eq!(commit_subjects(&target).len(), 3);
    assert!(db.is_file());
}

#[test]
fn dry_run_skips_init_and_writes_nothing() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("repo");
    write_source(&source);

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .args(["--init", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Add notes.md (10 bytes)"))
        .stdout(predicate::str::contains(
            "[DRY RUN] plan.txt version 2.0 (plan 2.0.txt, 11 bytes)",
        ));
    assert!(!target.exists());
}

#[test]
fn dry_run_does_not_create_ledger_database() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let db = tmp.path().join("state/ledger.db");
    write_source(&source);
    let database_url = format!("sqlite://{}", db.display());

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(tmp.path().join("repo"))
        .args(["--init", "--dry-run", "--database-url", &database_url])
        .assert()
        .success()
        .stdout(predicate::str::contains("[DRY RUN] Add notes.md"));

    assert!(!db.exists());
    assert!(!tmp.path().join("state").exists());
}

#[test]
fn dry_run_reads_existing_ledger_without_changing_it() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let target = tmp.path().join("repo");
    let config = tmp.path().join("config.yaml");
    let db = tmp.path().join("export.db");
    write_source(&source);
    write(&config, IDENTITY_CONFIG).unwrap();
    let database_url = format!("sqlite://{}", db.display());

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .args(["--init", "--database-url", &database_url])
        .arg("--config")
        .arg(&config)
        .assert()
        .success();
    let before = std::fs::read(&db).unwrap();

    write(source.join("plan 3.0.txt"), "third plan").unwrap();
    replay_cmd(tmp.path())
        .arg(&source)
        .arg(&target)
        .args(["--dry-run", "--database-url", &database_url])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] plan.txt version 3.0 (plan 3.0.txt, 10 bytes)",
        ))
        .stdout(predicate::str::contains("[DRY RUN] Add notes.md").not());

    assert_eq!(std::fs::read(&db).unwrap(), before);
    assert_eq!(commit_subjects(&target).len(), 3);
}

#[test]
fn unsupported_database_url_is_fatal() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    write_source(&source);

    replay_cmd(tmp.path())
        .arg(&source)
        .arg(tmp.path().join("repo"))
        .args(["--init", "--database-url", "postgresql://localhost/export"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("unsupported database url"));
}

#[test]
fn export_without_confluence_section_fails() {
    let tmp = tempdir().unwrap();
    let config = tmp.path().join("config.yaml");
    write(&config, "output_dir: ./out\n").unwrap();

    Command::cargo_bin("wiki-export")
        .expect("Binary exists")
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("confluence"));
}

#[test]
fn export_without_credentials_fails() {
    let tmp = tempdir().unwrap();
    let config = tmp.path().join("config.yaml");
    write(
        &config,
        "confluence:\n  url: https://example.atlassian.net\n  page_ids: [12345]\n",
    )
    .unwrap();

    Command::cargo_bin("wiki-export")
        .expect("Binary exists")
        .current_dir(tmp.path())
        .env_remove("CONFLUENCE_API_EMAIL")
        .env_remove("CONFLUENCE_API_TOKEN")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("CONFLUENCE_API_EMAIL"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Collects the debug rendering of every event.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use wiki_versioner::cli::{run, Cli};

    let tmp = tempdir().unwrap();
    let cli = Cli {
        source_dir: tmp.path().join("missing"),
        target_repo: tmp.path().join("repo"),
        dry_run: true,
        init: false,
        database_url: None,
        config: Some(tmp.path().join("dummy.yaml")),
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}

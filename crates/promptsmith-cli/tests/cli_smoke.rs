use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SMALL_CONFIG: &str = r#"configVersion: 1
task:
  task_description: "Triage incoming support email"
  behavioral_specs: "Classify and reply in one sentence."
  current_prompt: "You triage support email."
selection:
  num_initial_prompts: 4
  top_k: 2
  top_m: 1
tests:
  quick: { core: 2, edge: 0, boundary: 0, adversarial: 0, consistency: 0, format: 0 }
  rigorous: { core: 3, edge: 1, boundary: 0, adversarial: 0, consistency: 0, format: 0 }
refinement:
  max_iterations: 2
service:
  retry_backoff_ms: 1
"#;

fn promptsmith(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("promptsmith").unwrap();
    cmd.current_dir(dir).env_remove("OPENAI_API_KEY");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("promptsmith.yaml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn version_prints_crate_version() {
    let dir = TempDir::new().unwrap();
    promptsmith(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn init_writes_a_loadable_sample_once() {
    let dir = TempDir::new().unwrap();
    promptsmith(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(contains("created promptsmith.yaml"));
    let body = fs::read_to_string(dir.path().join("promptsmith.yaml")).unwrap();
    assert!(promptsmith_core::config::parse_config(&body, true).is_ok());

    promptsmith(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(contains("already exists"));
}

#[test]
fn fake_run_completes_and_writes_report() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), SMALL_CONFIG);

    promptsmith(dir.path())
        .args(["run", "--provider", "fake", "--db", "state.db", "--out", "out", "--strict"])
        .assert()
        .success()
        .stderr(contains("Champion: prompt"));

    let run_dir = dir.path().join("out").join("run-0001");
    for file in [
        "champion_prompt.txt",
        "optimization_report.json",
        "weakness_history.json",
        "champion_qa.json",
        "baseline_qa.json",
    ] {
        assert!(run_dir.join(file).exists(), "missing {file}");
    }
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("optimization_report.json")).unwrap())
            .unwrap();
    assert_eq!(report["run_id"], 1);
    assert_eq!(report["counts"]["initial_prompts"], 4);
    assert_eq!(report["counts"]["top_m"], 1);
    assert!(report["baseline"].is_object());

    promptsmith(dir.path())
        .args(["runs", "--db", "state.db"])
        .assert()
        .success()
        .stdout(contains("completed"))
        .stdout(contains("Triage incoming support email"));

    promptsmith(dir.path())
        .args(["status", "--db", "state.db", "--run-id", "1"])
        .assert()
        .success()
        .stdout(contains("status=completed"))
        .stdout(contains("stage persist_report: completed"))
        .stdout(contains("track 0: converged"));

    // a completed run resumes without redoing work
    promptsmith(dir.path())
        .args(["resume", "--provider", "fake", "--db", "state.db", "--run-id", "1"])
        .assert()
        .success()
        .stderr(contains("resuming run 1"));

    promptsmith(dir.path())
        .args(["report", "--db", "state.db", "--out", "again"])
        .assert()
        .success();
    assert!(dir
        .path()
        .join("again/run-0001/champion_prompt.txt")
        .exists());
}

#[test]
fn invalid_selection_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    write_config(
        dir.path(),
        &SMALL_CONFIG.replace("top_k: 2", "top_k: 0"),
    );

    promptsmith(dir.path())
        .args(["run", "--provider", "fake", "--db", "state.db"])
        .assert()
        .code(2)
        .stderr(contains("top_k"));
    assert!(!dir.path().join("state.db").exists());
}

#[test]
fn unknown_keys_fail_only_in_strict_mode() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), &format!("{SMALL_CONFIG}surprise: true\n"));

    promptsmith(dir.path())
        .args(["run", "--provider", "fake", "--db", "state.db", "--strict"])
        .assert()
        .code(2)
        .stderr(contains("unknown fields"));

    promptsmith(dir.path())
        .args(["run", "--provider", "fake", "--db", "state.db"])
        .assert()
        .success();
}

#[test]
fn openai_without_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), SMALL_CONFIG);

    promptsmith(dir.path())
        .args(["run", "--provider", "openai", "--db", "state.db"])
        .assert()
        .code(2)
        .stderr(contains("OPENAI_API_KEY"));
}

#[test]
fn unknown_run_is_a_run_failure_not_a_config_error() {
    let dir = TempDir::new().unwrap();

    promptsmith(dir.path())
        .args(["status", "--db", "state.db", "--run-id", "9"])
        .assert()
        .code(1)
        .stderr(contains("9"));

    promptsmith(dir.path())
        .args(["report", "--db", "state.db"])
        .assert()
        .code(1)
        .stderr(contains("no runs recorded yet"));
}

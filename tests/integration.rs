//! End-to-end tests for uitest
//!
//! Library tests load the YAML fixtures and drive them through the runner
//! under paused time. CLI tests run the built binary against the same files.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uitest::common::config::EngineConfig;
use uitest::engine::condition::ObjectAppeared;
use uitest::engine::{
    run_batch, run_step_with_timeout, CancelToken, CaseEnd, Environment, RunPhase, Runner, Step,
    StepBody, StepContext, StepRun, Waiter,
};
use uitest::host::{Host, Interaction, MemoryHost, SceneControl, SceneFixture};
use uitest::testing::{load_case, LoadedCase};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn case_path(name: &str) -> PathBuf {
    fixtures_dir().join("cases").join(format!("{}.yaml", name))
}

fn load(name: &str) -> (LoadedCase, Arc<MemoryHost>) {
    let loaded = load_case(&case_path(name)).expect("case file should load");
    let fixture = loaded.fixture.as_deref().expect("case names a fixture");
    let host = Arc::new(MemoryHost::new(
        SceneFixture::load(fixture).expect("fixture should load"),
    ));
    (loaded, host)
}

// ============== Library tests ==============

#[tokio::test(start_paused = true)]
async fn test_main_menu_case_passes() {
    let (loaded, host) = load("main_menu");
    let steps = loaded.case.steps.len();

    let env = Arc::new(Environment::new());
    let runner = Runner::new(env.clone(), EngineConfig::default()).unwrap();
    runner.set_test_case(loaded.case).unwrap();
    assert_eq!(runner.snapshot().phase, RunPhase::Preparing);

    env.ready(host.clone() as Arc<dyn Host>).unwrap();
    let state = runner.wait_until_settled().await.unwrap();

    assert_eq!(state.phase, RunPhase::Finished { success: true });
    assert_eq!(state.step_results, vec![Some(true); steps]);
    assert_eq!(state.failure_message, None);
    assert_eq!(state.outcomes[0].note, "Loading overlay gone");
    assert!(state.outcomes[0].elapsed >= Duration::from_millis(300));

    let interactions = host.interactions();
    assert_eq!(
        interactions,
        vec![
            Interaction::InputText {
                target: "Canvas/Name".to_string(),
                text: "Ada".to_string()
            },
            Interaction::SelectOption {
                target: "Canvas/Difficulty".to_string(),
                index: 2
            },
            Interaction::SetToggle {
                target: "Canvas/Music".to_string(),
                on: true
            },
            Interaction::Press {
                target: "Canvas/PlayButton".to_string()
            },
            Interaction::SceneRequested {
                name: "GameScene".to_string()
            },
        ]
    );
    assert_eq!(host.active_scene().as_deref(), Some("GameScene"));
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_aborts_case() {
    let (loaded, host) = load("missing_button");
    let env = Arc::new(Environment::with_host(host));
    let runner = Runner::new(env, EngineConfig::default()).unwrap();

    runner.set_test_case(loaded.case).unwrap();
    let state = runner.wait_until_settled().await.unwrap();

    assert_eq!(state.phase, RunPhase::Finished { success: false });
    assert_eq!(state.step_results, vec![Some(false), None]);
    assert!(state.has_failed);
    let message = state.failure_message.unwrap();
    assert!(
        message.starts_with("Step timed out after 0.5 seconds"),
        "unexpected message: {}",
        message
    );
    assert_eq!(state.outcomes[0].elapsed, Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_mid_run_fails_case() {
    let (loaded, host) = load("main_menu");
    let env = Arc::new(Environment::with_host(host));
    let runner = Runner::new(env.clone(), EngineConfig::default()).unwrap();
    runner.set_test_case(loaded.case).unwrap();

    // The first step is still waiting for the loading overlay
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(runner.snapshot().is_running);
    env.tear_down();

    let state = runner.wait_until_settled().await.unwrap();
    assert_eq!(state.phase, RunPhase::Finished { success: false });
    assert_eq!(state.failure_message.as_deref(), Some("environment torn down"));
    assert!(!state.is_running);
}

#[tokio::test(start_paused = true)]
async fn test_batch_shares_host_and_continues_after_failure() {
    let (keep_going, host) = load("keep_going");
    let (missing, _) = load("missing_button");
    let cases = vec![keep_going.case, missing.case];

    let config = EngineConfig::default().with_case_gap(Duration::from_millis(250));
    let ctx = StepContext::new(host, Waiter::from_config(&config));
    let report = run_batch(&cases, &ctx, &config, &CancelToken::new(), &mut ()).await;

    assert_eq!(report.cases.len(), 2);
    assert!(!report.cancelled);
    assert_eq!(report.failed(), 2);

    let first = &report.cases[0];
    let results: Vec<bool> = first.outcomes.iter().map(|o| o.success).collect();
    assert_eq!(results, vec![true, false, true]);
    assert_eq!(first.end, CaseEnd::Completed);
    assert!(first
        .failure_message()
        .unwrap()
        .contains("SceneLoaded(GameScene): active scene is 'MainMenu'"));

    assert!(matches!(report.cases[1].end, CaseEnd::Aborted { step: 0, .. }));
}

struct OpenInventory;

#[async_trait]
impl StepBody for OpenInventory {
    fn name(&self) -> String {
        "Open inventory".to_string()
    }

    async fn run(&self, ctx: &StepContext) -> uitest::Result<()> {
        let mut panel = ObjectAppeared::new("Canvas/Inventory");
        ctx.wait_for_within(&mut panel, Duration::from_millis(500)).await?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_step_timeout_names_its_own_line() {
    let (_, host) = load("main_menu");
    let config = EngineConfig::default();
    let ctx = StepContext::new(host, Waiter::from_config(&config));
    let step = Step::custom(Arc::new(OpenInventory));

    let run =
        run_step_with_timeout(&step, 0, &ctx, config.step_timeout, &CancelToken::new()).await;
    let StepRun::Completed(outcome) = run else {
        panic!("step should not be cancelled");
    };
    assert!(!outcome.success);
    let message = outcome.error_message.unwrap();
    assert!(message.contains("integration.rs"), "{}", message);
    assert!(message.contains("ObjectAppeared(Canvas/Inventory)"), "{}", message);
}

#[test]
fn test_invalid_case_file_names_step() {
    let err = load_case(&case_path("invalid")).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("invalid.yaml"), "{}", message);
    assert!(message.contains("step 2: unknown action 'teleport'"), "{}", message);
}

// ============== CLI tests ==============

/// Output from a uitest invocation
#[derive(Debug)]
struct CliOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

/// Run the binary with an empty config file so user settings never leak in
fn run_uitest(args: &[&str]) -> CliOutput {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").expect("Failed to write config");

    let output = Command::new(env!("CARGO_BIN_EXE_uitest"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run uitest");

    CliOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code(),
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("fixture path is valid UTF-8")
}

#[test]
fn test_cli_validate() {
    let good = case_path("main_menu");
    let bad = case_path("invalid");

    let output = run_uitest(&["validate", arg(&good)]);
    assert_eq!(output.code, Some(0), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("(8 steps)"), "{}", output.stdout);

    let output = run_uitest(&["validate", arg(&good), arg(&bad)]);
    assert_eq!(output.code, Some(1));
    assert!(output.stdout.contains("unknown action 'teleport'"), "{}", output.stdout);
    assert!(output.stdout.contains("1 of 2 file(s) invalid"), "{}", output.stdout);
}

#[test]
fn test_cli_run_passes() {
    let output = run_uitest(&["run", arg(&case_path("main_menu"))]);
    assert_eq!(output.code, Some(0), "stdout: {}\nstderr: {}", output.stdout, output.stderr);
    assert!(output.stdout.contains("Running Test: main-menu"));
    assert!(output.stdout.contains("Step 8: Log: done"));
    assert!(output.stdout.contains("Test Passed"));
}

#[test]
fn test_cli_run_json_report() {
    let output = run_uitest(&["run", "--json", arg(&case_path("missing_button"))]);
    assert_eq!(output.code, Some(1));

    let report: serde_json::Value =
        serde_json::from_str(&output.stdout).expect("stdout should be a JSON report");
    assert_eq!(report["name"], "missing-button");
    assert_eq!(report["success"], false);
    assert_eq!(report["steps_total"], 2);
    assert_eq!(report["steps"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["steps"][0]["error_kind"], "timeout");
}

#[test]
fn test_cli_batch_summary() {
    let output = run_uitest(&[
        "batch",
        "--gap",
        "0",
        arg(&case_path("main_menu")),
        arg(&case_path("missing_button")),
    ]);
    assert_eq!(output.code, Some(1));
    assert!(output.stdout.contains("1 passed, 1 failed"), "{}", output.stdout);
}

#[test]
fn test_cli_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[polling]\ninterval_frames = 0\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_uitest"))
        .arg("--config")
        .arg(&config)
        .args(["validate", arg(&case_path("main_menu"))])
        .output()
        .expect("Failed to run uitest");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("interval_frames"));
}

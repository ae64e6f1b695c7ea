use assert_cmd::Command;
use predicates::prelude::*;

fn transcriptor(config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("transcriptor").unwrap();
    cmd.env_remove("TRANSCRIPTOR_CONFIG")
        .env("RUST_LOG", "off")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn invalid_url_fails_with_validation_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    transcriptor(&config)
        .args(["--quiet", "transcribe", "definitely not a link"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("does not look like a supported video URL"))
        .stderr(predicate::str::contains("VALIDATION"));

    // First run writes the default config
    assert!(config.exists());
}

#[test]
fn invalid_url_json_output_carries_kind() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    transcriptor(&config)
        .args(["--quiet", "transcribe", "ftp://example.com/clip", "--format", "json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"kind\": \"VALIDATION\""));
}

#[test]
fn providers_lists_filter_reasons() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        "providers:\n  - id: locked-api\n    kind: api\n    priority: 1\n    credential_env: TRANSCRIPTOR_CLI_TEST_TOKEN\n    api:\n      base_url: https://api.example.com\n  - id: web\n    kind: browser_automation\n    priority: 2\n  - id: off\n    kind: browser_automation\n    priority: 3\n    enabled: false\n",
    )
    .unwrap();

    transcriptor(&config)
        .env_remove("TRANSCRIPTOR_CLI_TEST_TOKEN")
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("locked-api"))
        .stdout(predicate::str::contains("missing_credential"))
        .stdout(predicate::str::contains("disabled"))
        .stdout(predicate::str::contains("usable"));
}

#[test]
fn duplicate_provider_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        "providers:\n  - id: web\n    kind: browser_automation\n  - id: web\n    kind: browser_automation\n",
    )
    .unwrap();

    transcriptor(&config)
        .args(["config", "--show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate provider id"));
}

#[test]
fn config_show_prints_providers() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");

    transcriptor(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tokscript-api"))
        .stdout(predicate::str::contains("tokaudit-web"));
}

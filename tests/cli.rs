use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

fn sshmount() -> assert_cmd::Command {
    cargo_bin_cmd!("sshmount").into()
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let config_path = dir.path().join("sshmount.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(f, "{body}").unwrap();
    config_path
}

#[test]
fn help_works() {
    sshmount()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Mount local directories into remote hosts over SSHFS",
        ));
}

#[test]
fn mount_help_lists_target_flag() {
    sshmount()
        .args(["mount", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"));
}

#[test]
fn missing_subcommand_fails() {
    sshmount().assert().failure();
}

#[test]
fn missing_config_shows_error() {
    sshmount()
        .args(["--config", "/nonexistent/sshmount.toml", "mount"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn unparseable_config_shows_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, "[ssh\nhost = ");

    sshmount()
        .args(["--config", config_path.to_str().unwrap(), "mount"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
}

#[test]
fn validation_rejects_empty_host() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[ssh]
host = ""
user = "ubuntu"

[[mounts]]
source = "."
target = "project"
"#,
    );

    sshmount()
        .args(["--config", config_path.to_str().unwrap(), "mount"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ssh.host must not be empty"));
}

#[test]
fn validation_rejects_config_without_mounts() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[ssh]
host = "127.0.0.1"
user = "ubuntu"
"#,
    );

    sshmount()
        .args(["--config", config_path.to_str().unwrap(), "install"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one [[mounts]] entry"));
}

#[test]
fn validation_rejects_bad_id_map() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[ssh]
host = "127.0.0.1"
user = "ubuntu"

[[mounts]]
source = "."
target = "project"
uid_map = ["1000"]
"#,
    );

    sshmount()
        .args(["--config", config_path.to_str().unwrap(), "mount"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mounts[0].uid_map"));
}

#[test]
fn unknown_target_filter_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(
        &dir,
        r#"
instance = "cli-test"

[ssh]
host = "127.0.0.1"
user = "ubuntu"

[[mounts]]
source = "."
target = "project"
"#,
    );

    sshmount()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "mount",
            "--target",
            "elsewhere",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no mount with target 'elsewhere'"));
}

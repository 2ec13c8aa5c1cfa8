use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

struct CliFixture {
    tmp: TempDir,
    home_dir: PathBuf,
    data_dir: PathBuf,
    config_path: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home_dir = tmp.path().join("home");
        let data_dir = tmp.path().join("data");
        let config_path = tmp.path().join("subvault.yaml");
        std::fs::create_dir_all(&home_dir).unwrap();
        std::fs::create_dir_all(&data_dir).unwrap();

        Self {
            tmp,
            home_dir,
            data_dir,
            config_path,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(subvault_binary_path());
        cmd.current_dir(self.tmp.path());
        cmd.env("HOME", &self.home_dir);
        cmd.env("XDG_CONFIG_HOME", self.home_dir.join(".config"));
        cmd.env_remove("SUBVAULT_CONFIG");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        if !output.status.success() {
            panic!(
                "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
                args,
                stdout(&output),
                stderr(&output)
            );
        }
        stdout(&output)
    }

    fn run_err(&self, args: &[&str]) -> (String, String) {
        let output = self.run(args);
        assert!(
            !output.status.success(),
            "command unexpectedly succeeded: {:?}\nstdout:\n{}\nstderr:\n{}",
            args,
            stdout(&output),
            stderr(&output)
        );
        assert_eq!(output.status.code(), Some(1));
        (stdout(&output), stderr(&output))
    }

    fn config_arg(&self) -> String {
        self.config_path.to_string_lossy().to_string()
    }

    fn write_command_config(&self) {
        let config = format!(
            "data_dir: {}\nsource:\n  type: command\n  dump: \"cp -r /srv/db/. {{dir}}\"\n  restore: \"cp -r {{dir}}/. /srv/db\"\n",
            yaml_quote_path(&self.data_dir)
        );
        std::fs::write(&self.config_path, config).unwrap();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn subvault_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_subvault"))
}

fn yaml_quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[test]
fn help_lists_every_command() {
    let fx = CliFixture::new();
    let out = fx.run_ok(&["--help"]);
    for command in [
        "backup",
        "list",
        "sizes",
        "restore",
        "reconcile",
        "journal",
        "break-lock",
        "config",
    ] {
        assert!(out.contains(command), "missing {command} in:\n{out}");
    }
    assert!(out.contains("SUBVAULT_CONFIG"));
}

#[test]
fn missing_config_explains_search_order() {
    let fx = CliFixture::new();
    let (_, err) = fx.run_err(&["list"]);
    assert!(err.contains("no configuration file found"), "{err}");
    assert!(err.contains("subvault.yaml"), "{err}");
    assert!(err.contains("subvault config"), "{err}");
}

#[test]
fn config_command_writes_a_loadable_template() {
    let fx = CliFixture::new();
    let dest = fx.tmp.path().join("generated").join("config.yaml");
    let dest_str = dest.to_string_lossy().to_string();

    let out = fx.run_ok(&["config", "--dest", &dest_str]);
    assert!(out.contains("Config written to:"));
    assert!(dest.exists());

    let (_, err) = fx.run_err(&["config", "--dest", &dest_str]);
    assert!(err.contains("already exists"), "{err}");
}

#[test]
fn invalid_config_is_reported() {
    let fx = CliFixture::new();
    std::fs::write(
        &fx.config_path,
        "source:\n  type: command\n  dump: a\n  restore: b\nretention: {}\n",
    )
    .unwrap();

    let (_, err) = fx.run_err(&["--config", &fx.config_arg(), "list"]);
    assert!(err.contains("Error: configuration error"), "{err}");
}

#[test]
fn conflicting_ydb_auth_is_rejected() {
    let fx = CliFixture::new();
    let config = format!(
        "data_dir: {}\nsource:\n  type: ydb\n  endpoint: grpc://localhost:2136\n  database: /local\n  profile: a\n  use_metadata_credentials: true\n",
        yaml_quote_path(&fx.data_dir)
    );
    std::fs::write(&fx.config_path, config).unwrap();

    let (_, err) = fx.run_err(&["--config", &fx.config_arg(), "list"]);
    assert!(err.contains("authentication"), "{err}");
}

#[test]
fn break_lock_removes_a_leftover_lock() {
    let fx = CliFixture::new();
    fx.write_command_config();
    let lock = fx.data_dir.join("lock.json");
    std::fs::write(
        &lock,
        r#"{"hostname":"elsewhere","pid":1,"time":"2023-11-14T22:13:20Z"}"#,
    )
    .unwrap();

    let out = fx.run_ok(&["--config", &fx.config_arg(), "break-lock"]);
    assert!(out.contains("Removed lock"), "{out}");
    assert!(!lock.exists());

    let out = fx.run_ok(&["--config", &fx.config_arg(), "break-lock"]);
    assert!(out.contains("No lock found."), "{out}");
}

#[test]
fn config_is_found_through_environment_and_project_file() {
    let fx = CliFixture::new();
    fx.write_command_config();

    let output = fx
        .command()
        .env("SUBVAULT_CONFIG", &fx.config_path)
        .args(["break-lock"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    // ./subvault.yaml in the working directory.
    let out = fx.run_ok(&["break-lock"]);
    assert!(out.contains("No lock found."), "{out}");
}

#[test]
fn config_placeholders_are_expanded() {
    let fx = CliFixture::new();
    std::fs::write(
        &fx.config_path,
        "data_dir: ${SUBVAULT_TEST_DATA}\nsource:\n  type: command\n  dump: a {dir}\n  restore: b {dir}\n",
    )
    .unwrap();

    let output = fx
        .command()
        .env("SUBVAULT_TEST_DATA", &fx.data_dir)
        .args(["--config", &fx.config_arg(), "break-lock"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));

    let (_, err) = fx.run_err(&["--config", &fx.config_arg(), "break-lock"]);
    assert!(err.contains("SUBVAULT_TEST_DATA"), "{err}");
}

#[test]
fn bad_compression_override_fails_before_touching_the_volume() {
    let fx = CliFixture::new();
    fx.write_command_config();

    let (_, err) = fx.run_err(&[
        "--config",
        &fx.config_arg(),
        "backup",
        "--compression",
        "brotli",
    ]);
    assert!(err.contains("compression"), "{err}");
    assert!(!fx.data_dir.join("lock.json").exists());
    assert!(!fx.data_dir.join("data.img").exists());
}

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;

const PROD_KEY: &str = "sk-ant-abcdefghij12";
const DEV_KEY: &str = "custom-key-1234567890";

struct TestEnv {
    dir: tempfile::TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn store_dir(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn store_path(&self) -> PathBuf {
        self.store_dir().join("profiles.json")
    }

    fn read_store(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.store_path()).expect("read store");
        serde_json::from_str(&raw).expect("parse store")
    }

    fn run(&self, args: &[&str]) -> String {
        let output = self.run_output(args);
        if !output.status.success() {
            panic!(
                "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
                args,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        ascii_only(String::from_utf8_lossy(&output.stdout).as_ref())
    }

    fn run_expect_error(&self, args: &[&str]) -> String {
        let output = self.run_output(args);
        if output.status.success() {
            panic!(
                "command unexpectedly succeeded: {:?}\nstdout:\n{}",
                args,
                String::from_utf8_lossy(&output.stdout)
            );
        }
        ascii_only(String::from_utf8_lossy(&output.stderr).as_ref())
    }

    fn run_output(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(resolve_bin_path());
        cmd.args(args)
            .env("ENDPOINT_PROFILES_HOME", self.store_dir())
            .env("ENDPOINT_PROFILES_COMMAND", "endpoint-profiles")
            .env_remove("ENDPOINT_PROFILES_LOG")
            .env("NO_COLOR", "1")
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .stdin(Stdio::null());
        cmd.output().expect("run command")
    }

    fn add(&self, name: &str, base_url: &str, key: &str) -> String {
        self.run(&[
            "--plain",
            "add",
            "--name",
            name,
            "--base-url",
            base_url,
            "--api-key",
            key,
        ])
    }
}

fn ascii_only(raw: &str) -> String {
    let output = raw.replace('\r', "");
    let filtered: String = output.chars().filter(|ch| ch.is_ascii()).collect();
    filtered
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = env::var("CARGO_BIN_EXE_endpoint-profiles") {
        return PathBuf::from(path);
    }
    let exe = env::current_exe().expect("current exe");
    let target_dir = exe
        .parent()
        .and_then(|path| path.parent())
        .expect("target dir");
    let name = if cfg!(windows) {
        "endpoint-profiles.exe"
    } else {
        "endpoint-profiles"
    };
    target_dir.join(name)
}

fn spawn_server(status_line: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

#[test]
fn list_without_profiles() {
    let env = TestEnv::new();
    let out = env.run(&["--plain", "list"]);
    assert!(out.contains("No profiles saved yet."), "{out}");
    assert!(!env.store_path().exists());
}

#[test]
fn add_list_and_mask() {
    let env = TestEnv::new();
    let out = env.add("Prod", "https://api.example.com", PROD_KEY);
    assert!(out.contains("Created profile Prod (now active)"), "{out}");
    let out = env.add("Dev", "http://localhost:8080", DEV_KEY);
    assert!(out.contains("Created profile Dev"), "{out}");
    assert!(!out.contains("now active"), "{out}");

    let out = env.run(&["--plain", "list"]);
    assert!(out.contains("Prod [ACTIVE]"), "{out}");
    assert!(out.contains("URL:      https://api.example.com"), "{out}");
    assert!(out.contains("Key:      sk-antij12"), "{out}");
    assert!(!out.contains(PROD_KEY), "{out}");

    let store = env.read_store();
    assert_eq!(store["profiles"].as_array().map(Vec::len), Some(2));
}

#[test]
fn duplicate_names_fail() {
    let env = TestEnv::new();
    env.add("Prod", "https://api.example.com", PROD_KEY);
    let err = env.run_expect_error(&[
        "add",
        "--name",
        " prod ",
        "--base-url",
        "https://api.example.com",
        "--api-key",
        PROD_KEY,
    ]);
    assert!(err.contains("already exists"), "{err}");
    let err = env.run_expect_error(&[
        "add",
        "--name",
        "Other",
        "--base-url",
        "ftp://api.example.com",
        "--api-key",
        PROD_KEY,
    ]);
    assert!(err.contains("Invalid base URL"), "{err}");
}

#[test]
fn switch_then_delete() {
    let env = TestEnv::new();
    env.add("Prod", "https://api.example.com", PROD_KEY);
    env.add("Dev", "http://localhost:8080", DEV_KEY);

    let err = env.run_expect_error(&["delete", "Prod", "--yes"]);
    assert!(err.contains("Switch profile first"), "{err}");
    let err = env.run_expect_error(&["delete", "Dev"]);
    assert!(err.contains("requires --yes"), "{err}");

    env.run(&["--plain", "use", "dev"]);
    let out = env.run(&["--plain", "delete", "Prod", "--yes"]);
    assert!(out.contains("Deleted profile Prod"), "{out}");

    let store = env.read_store();
    let profiles = store["profiles"].as_array().expect("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(store["activeProfileId"], profiles[0]["id"]);
}

#[test]
fn use_none_and_env() {
    let env = TestEnv::new();
    env.add("Prod", "https://api.example.com", PROD_KEY);
    env.run(&[
        "--plain",
        "update",
        "Prod",
        "--sonnet",
        "sonnet-model",
        "--haiku",
        " ",
    ]);

    let out = env.run(&["env"]);
    assert!(out.contains("BASE_URL=https://api.example.com"), "{out}");
    assert!(out.contains(&format!("AUTH_TOKEN={PROD_KEY}")), "{out}");
    assert!(out.contains("DEFAULT_SONNET_MODEL=sonnet-model"), "{out}");
    assert!(!out.contains("DEFAULT_HAIKU_MODEL"), "{out}");

    let out = env.run(&["env", "--prefix", "ANTHROPIC_", "--export"]);
    assert!(out.contains("export ANTHROPIC_BASE_URL="), "{out}");

    env.run(&["--plain", "use", "--none"]);
    let output = env.run_output(&["env"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No active profile"));
}

#[test]
fn use_without_tty_needs_a_name() {
    let env = TestEnv::new();
    env.add("Prod", "https://api.example.com", PROD_KEY);
    let err = env.run_expect_error(&["use"]);
    assert!(err.contains("requires a TTY"), "{err}");
    let err = env.run_expect_error(&["use", "staging"]);
    assert!(err.contains("was not found"), "{err}");
}

#[test]
fn explicit_store_flag_wins() {
    let env = TestEnv::new();
    let other = env.dir.path().join("elsewhere").join("creds.json");
    let other_arg = other.to_string_lossy().into_owned();
    env.run(&[
        "--plain",
        "--store",
        &other_arg,
        "add",
        "--name",
        "Prod",
        "--base-url",
        "https://api.example.com",
        "--api-key",
        PROD_KEY,
    ]);
    assert!(other.is_file());
    assert!(!env.store_path().exists());
}

#[test]
fn corrupt_store_backup_policy() {
    let env = TestEnv::new();
    fs::create_dir_all(env.store_dir()).unwrap();
    fs::write(env.store_path(), "not json").unwrap();
    let out = env.run(&["--plain", "--on-corrupt", "backup", "list"]);
    assert!(out.contains("No profiles saved yet."), "{out}");
    let backups: Vec<_> = fs::read_dir(env.store_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
        .collect();
    assert_eq!(backups.len(), 1);
    assert!(!env.store_path().exists());
}

#[test]
fn test_command_reports_outcomes() {
    let env = TestEnv::new();
    let ok = spawn_server("200 OK");
    let out = env.run(&["--plain", "test", "--base-url", &ok, "--api-key", PROD_KEY]);
    assert!(out.contains("Connected (200"), "{out}");

    let denied = spawn_server("401 Unauthorized");
    let err = env.run_expect_error(&["--plain", "test", "--base-url", &denied, "--api-key", PROD_KEY]);
    assert!(err.contains("Authentication failed (401)"), "{err}");

    let err = env.run_expect_error(&["--plain", "test"]);
    assert!(err.contains("Pass a profile"), "{err}");
}

#[test]
fn add_with_test_refuses_failed_probe() {
    let env = TestEnv::new();
    let denied = spawn_server("401 Unauthorized");
    let err = env.run_expect_error(&[
        "add",
        "--name",
        "Prod",
        "--base-url",
        &denied,
        "--api-key",
        PROD_KEY,
        "--test",
    ]);
    assert!(err.contains("not saved"), "{err}");
    assert!(!env.store_path().exists());
}

#[test]
fn unknown_command_is_a_usage_error() {
    let env = TestEnv::new();
    let err = env.run_expect_error(&["nope"]);
    assert!(err.contains("error:"), "{err}");
}

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    /// Environment with a token configured
    fn with_token() -> Self {
        let env = Self::new();
        let config_dir = env.xdg_config.join("vemetric");
        fs::create_dir_all(&config_dir).expect("failed to create config dir");
        fs::write(
            config_dir.join("config.toml"),
            "[tracking]\ntoken = \"test-token\"\nhost = \"https://collect.example.com\"\n",
        )
        .expect("failed to write config");
        env
    }

    /// Environment whose endpoint refuses connections
    fn with_unreachable_host() -> Self {
        let env = Self::new();
        let config_dir = env.xdg_config.join("vemetric");
        fs::create_dir_all(&config_dir).expect("failed to create config dir");
        fs::write(
            config_dir.join("config.toml"),
            "[tracking]\ntoken = \"test-token\"\nhost = \"http://127.0.0.1:9\"\n\n[transport]\ntimeout_secs = 2\n",
        )
        .expect("failed to write config");
        env
    }

    fn session_path(&self) -> PathBuf {
        self.xdg_state.join("vemetric/session.json")
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("vemetric"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute vemetric: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "vemetric {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run_bin(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn status_reports_defaults_without_config() {
    let env = CliTestEnv::new();

    let stdout = run_ok(&env, &["status"]);
    assert!(stdout.contains("Token:           <not set>"));
    assert!(stdout.contains("https://hub.vemetric.com"));
    assert!(stdout.contains("Session:         <none>"));
}

#[test]
fn status_reads_config_file() {
    let env = CliTestEnv::with_token();

    let stdout = run_ok(&env, &["status"]);
    assert!(stdout.contains("Token:           <set>"));
    assert!(stdout.contains("https://collect.example.com"));
}

#[test]
fn track_without_token_fails() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["--url", "http://localhost:3000/", "track", "Signup"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to initialize tracker"),
        "unexpected stderr:\n{stderr}"
    );
}

#[test]
fn local_pages_are_suppressed_but_keep_a_session() {
    let env = CliTestEnv::with_token();
    let args = [
        "--url",
        "http://localhost:3000/pricing",
        "track",
        "Signup",
        "--data",
        "plan=pro",
        "--data",
        "seats=5",
    ];

    let stdout = run_ok(&env, &args);
    assert!(stdout.contains("trackEvent: done"));

    let session = fs::read_to_string(env.session_path()).expect("session file missing");
    assert!(session.contains("_vmCtx"), "unexpected session:\n{session}");
}

#[test]
fn token_attribute_overrides_missing_config() {
    let env = CliTestEnv::new();

    let stdout = run_ok(
        &env,
        &[
            "--url",
            "http://localhost:3000/",
            "--attr",
            "data-token=attr-token",
            "page-view",
        ],
    );
    assert!(stdout.contains("trackPageView: done"));
}

#[test]
fn identify_whoami_reset_and_end_session() {
    let env = CliTestEnv::with_token();
    let local = ["--url", "http://localhost:3000/"];

    let stdout = run_ok(&env, &["whoami"]);
    assert!(stdout.contains("No active session"));

    let mut args = local.to_vec();
    args.extend(["identify", "user-1", "--display-name", "Ada", "--set", "plan=pro"]);
    run_ok(&env, &args);

    let stdout = run_ok(&env, &["whoami"]);
    assert!(stdout.contains("User:            user-1"));
    assert!(stdout.contains("Display Name:    Ada"));

    let mut args = local.to_vec();
    args.push("reset");
    run_ok(&env, &args);

    let stdout = run_ok(&env, &["whoami"]);
    assert!(stdout.contains("User:            <anonymous>"));

    let stdout = run_ok(&env, &["end-session"]);
    assert!(stdout.contains("Session ended"));
    assert!(!env.session_path().exists());

    let stdout = run_ok(&env, &["end-session"]);
    assert!(stdout.contains("No active session"));
}

#[test]
fn malformed_key_value_is_rejected() {
    let env = CliTestEnv::with_token();

    let output = run_bin(&env, &["track", "Signup", "--data", "novalue"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected KEY=VALUE"));
}

#[test]
fn queued_command_failure_sets_exit_status() {
    let env = CliTestEnv::with_unreachable_host();
    let args = ["--url", "https://shop.example.com/cart", "track", "Checkout"];

    let output = run_bin(&env, &args);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("trackEvent failed"),
        "unexpected stderr:\n{stderr}"
    );
    assert!(!String::from_utf8_lossy(&output.stdout).contains("done"));
}

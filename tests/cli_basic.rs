use std::path::Path;
use std::process::{Command, Output};

fn stackyard(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stackyard"))
        .args(args)
        .current_dir(data_dir)
        .env("STACKYARD_DATA_DIR", data_dir)
        .env_remove("STACKYARD_CONFIG")
        .env_remove("STACKYARD_TEMPLATE_DIR")
        .env_remove("USE_HOST_MEMORY")
        .output()
        .expect("failed to run stackyard")
}

fn text(out: &Output) -> String {
    format!(
        "status: {:?}\nstdout:\n{}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

#[test]
fn test_cli_version_shows_build_info() {
    let td = tempfile::tempdir().unwrap();
    let out = stackyard(td.path(), &["--version"]);
    assert!(out.status.success(), "{}", text(&out));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn test_cli_list_on_empty_data_dir() {
    let td = tempfile::tempdir().unwrap();
    let out = stackyard(td.path(), &["list"]);
    assert!(out.status.success(), "{}", text(&out));
    assert!(String::from_utf8_lossy(&out.stdout).contains("no stacks"));

    let out = stackyard(td.path(), &["list", "--json"]);
    assert!(out.status.success(), "{}", text(&out));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v, serde_json::json!([]));
}

#[test]
fn test_cli_unknown_stack_exits_2_with_hint() {
    let td = tempfile::tempdir().unwrap();
    let out = stackyard(td.path(), &["status", "ghost-1"]);
    assert_eq!(out.status.code(), Some(2), "{}", text(&out));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("stack ghost-1 not found"), "{stderr}");
    assert!(stderr.contains("hint:"), "{stderr}");
}

#[test]
fn test_cli_rejects_malformed_config_pair() {
    let td = tempfile::tempdir().unwrap();
    let out = stackyard(td.path(), &["config", "set", "s-1", "novalue"]);
    assert!(!out.status.success(), "{}", text(&out));
    assert!(String::from_utf8_lossy(&out.stderr).contains("KEY=VALUE"));
}

#[test]
fn test_cli_bad_config_file_fails() {
    let td = tempfile::tempdir().unwrap();
    let cfg = td.path().join("stackyard.yaml");
    std::fs::write(&cfg, "host_url: \"not a url\"\n").unwrap();
    let out = stackyard(td.path(), &["--config", cfg.to_str().unwrap(), "list"]);
    assert_eq!(out.status.code(), Some(1), "{}", text(&out));
    assert!(String::from_utf8_lossy(&out.stderr).contains("loading configuration"));
}

use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn nvframe(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nvframe"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn config_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let lua = temp.path().join("lua");
    fs::create_dir_all(lua.join("plugins")).unwrap();
    fs::write(
        temp.path().join("lua").join("init.lua"),
        r#"
        local plugin = require("nvim.core.plugin")
        plugin.register("plenary", {})
        plugin.register("telescope", { dependencies = { "plenary" }, module = "plugins.telescope" })
        plugin.register("trouble", { lazy = true, cmd = "Trouble" })
        return {}
        "#,
    )
    .unwrap();
    fs::write(
        lua.join("plugins").join("telescope.lua"),
        "return { setup = function() end }",
    )
    .unwrap();
    temp
}

fn dir(temp: &TempDir) -> &str {
    temp.path().to_str().unwrap()
}

#[test]
fn test_run_prints_json_report() {
    let temp = config_tree();
    let out = nvframe(&["run", dir(&temp), "--format", "json"]);
    assert!(out.status.success());

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["entry"], "init");
    assert_eq!(
        report["plugins"]["loaded"],
        serde_json::json!(["plenary", "telescope"])
    );
}

#[test]
fn test_list_lazy_plugins() {
    let temp = config_tree();
    let out = nvframe(&["list", dir(&temp), "--lazy"]);
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("trouble"));
    assert!(!stdout.contains("telescope"));
}

#[test]
fn test_modules_pattern() {
    let temp = config_tree();
    let out = nvframe(&["modules", dir(&temp), "--pattern", "plugins.*"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "plugins.telescope");
}

#[test]
fn test_missing_entry_fails() {
    let temp = config_tree();
    let out = nvframe(&["run", dir(&temp), "--entry", "does.not.exist"]);
    assert!(!out.status.success());
}

#[test]
fn test_settings_file() {
    let temp = config_tree();
    let settings = temp.path().join("nvframe.toml");
    fs::write(&settings, "load_eager = false\n").unwrap();

    let out = nvframe(&[
        "--config",
        settings.to_str().unwrap(),
        "run",
        dir(&temp),
        "--format",
        "json",
    ]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(report["plugins"].is_null());
}

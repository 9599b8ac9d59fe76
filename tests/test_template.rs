mod fixtures;

use anyhow::Result;
use fixtures::*;
use rstest::*;
use serde_json::Value;

#[rstest]
fn test_template(mut rampart: RampartManager) -> Result<()> {
    assert!(rampart.pass(&["--no-config", "template"]));
    let value: Value = serde_json::from_str(&rampart.last_stdout)?;
    assert_eq!(value["id"], "org.chromium.Chromium");
    assert_eq!(value["identity"], 9);
    assert_eq!(value["container"]["home"], "/data/data/org.chromium.Chromium");
    assert!(value["container"]["filesystem"].is_array());

    assert!(rampart.pass(&["--no-config", "--json", "template"]));
    let value: Value = serde_json::from_str(&rampart.last_stdout)?;
    assert_eq!(value["status"], "success");
    assert_eq!(value["config"]["identity"], 9);
    Ok(())
}

#[rstest]
fn test_run_rejects_config(mut rampart: RampartManager) -> Result<()> {
    assert!(rampart.xfail(&["--no-config", "run", "/nonexistent/app.json"]));
    assert!(rampart.last_stderr.contains("Opening config"));

    rampart.run_with_stdin(&["--no-config", "run", "-"], "{\"identity\": ")?;
    assert_ne!(rampart.last_code, Some(0));
    assert!(rampart.last_stderr.contains("Decoding config"));

    let config = rampart.write_file(
        "relative.json",
        r#"{"id": "org.example.App", "identity": 1,
            "container": {"shell": "/bin/sh", "home": "home", "path": "/bin/true"}}"#,
    )?;
    assert!(rampart.xfail(&["--no-config", "run", &config.to_string_lossy()]));
    assert!(rampart.last_stderr.contains("invalid home directory"));
    Ok(())
}

#[rstest]
fn test_run_without_helper(mut rampart: RampartManager) -> Result<()> {
    let config = rampart.write_file(
        "app.json",
        r#"{"id": "org.example.App", "identity": 1,
            "container": {"shell": "/bin/sh", "home": "/home/app", "path": "/bin/true"}}"#,
    )?;
    assert!(rampart.xfail(&[
        "--no-config",
        "--hsu=/nonexistent/rsu",
        "run",
        &config.to_string_lossy(),
    ]));
    assert!(rampart.last_stderr.contains("the setuid helper is missing"));
    Ok(())
}

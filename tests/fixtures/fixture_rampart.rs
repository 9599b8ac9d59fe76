use anyhow::Result;
use log::warn;
use rand::Rng;
use rstest::*;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

pub fn rid() -> String {
    let mut rng = rand::rng();
    let rid: String = (0..10)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect();
    rid
}

pub fn get_rampart_bin() -> String {
    env!("CARGO_BIN_EXE_rampart").to_string()
}

/** Runs the built binary against a private config home. */
pub struct RampartManager {
    pub config_home: PathBuf,
    pub last_stdout: String,
    pub last_stderr: String,
    pub last_code: Option<i32>,
    pub rampart_bin: String,
    pub env: Vec<(String, String)>,
}

impl RampartManager {
    pub fn new() -> Self {
        let config_home =
            std::env::temp_dir().join(format!("rampart-test-{}", rid()));
        #[allow(clippy::panic)]
        if let Err(e) = std::fs::create_dir_all(config_home.join("rampart")) {
            panic!("Failed to create {}: {}", config_home.display(), e);
        }
        Self {
            config_home,
            last_stdout: String::new(),
            last_stderr: String::new(),
            last_code: None,
            rampart_bin: get_rampart_bin(),
            env: Vec::new(),
        }
    }

    /// Writes the user settings file picked up through XDG_CONFIG_HOME.
    #[allow(dead_code)]
    pub fn write_settings(&self, contents: &str) -> Result<()> {
        std::fs::write(self.config_home.join("rampart/config.toml"), contents)?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.config_home.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.rampart_bin);
        cmd.env_remove("RAMPART_SHIM")
            .env_remove("RAMPART_HSU")
            .env_remove("RAMPART_LOG_LEVEL")
            .env_remove("COMPLETE")
            .env("XDG_CONFIG_HOME", &self.config_home);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.args(args);
        cmd
    }

    fn record(&mut self, output: &Output) {
        self.last_stdout = String::from_utf8_lossy(&output.stdout).to_string();
        self.last_stderr = String::from_utf8_lossy(&output.stderr).to_string();
        self.last_code = output.status.code();
    }

    pub fn run(&mut self, args: &[&str]) -> Result<Output> {
        let output = self.command(args).output()?;
        self.record(&output);
        Ok(output)
    }

    #[allow(dead_code)]
    pub fn run_with_stdin(&mut self, args: &[&str], input: &str) -> Result<Output> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        self.record(&output);
        Ok(output)
    }

    #[allow(dead_code)]
    pub fn pass(&mut self, args: &[&str]) -> bool {
        if let Ok(output) = self.run(args) {
            if output.status.success() {
                return true;
            }
        }
        println!("last_stderr: {}", self.last_stderr);
        println!("last_stdout: {}", self.last_stdout);
        false
    }

    #[allow(dead_code)]
    pub fn xfail(&mut self, args: &[&str]) -> bool {
        if let Ok(output) = self.run(args) {
            if output.status.success() {
                println!("last_stderr: {}", self.last_stderr);
                println!("last_stdout: {}", self.last_stdout);
                return false;
            }
        }
        true
    }
}

impl Drop for RampartManager {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.config_home) {
            warn!("Failed to remove {}: {}", self.config_home.display(), e);
        }
    }
}

#[fixture]
pub fn rampart() -> RampartManager {
    RampartManager::new()
}

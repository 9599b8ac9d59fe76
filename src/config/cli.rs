use super::resolve_settings;
use clap::Parser;
use clap_complete::engine::{ArgValueCompleter, CompletionCandidate};
use std::path::PathBuf;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Set the log level to one of trace, debug, info, warn, or error.
    /// `-v` is shorthand for enabling verbose (trace) logging.
    #[arg(short = 'v',
        long,
        global = true,
        default_missing_value = "trace",
        num_args = 0..=1,
        require_equals = true,
        value_parser = parse_log_level
    )]
    pub log_level: Option<log::LevelFilter>,

    /// Path to the setuid helper.
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub hsu: Option<PathBuf>,

    /// Path to the container init program.
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub init: Option<PathBuf>,

    /// Formats action output as a JSON blob.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Do not load config files.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub no_config: bool,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand, Clone, Debug)]
#[command(subcommand_help_heading = "Actions")]
pub enum Action {
    /// Run a sandboxed program described by a JSON configuration
    Run {
        /// Configuration file, or `-` to read it from standard input
        #[arg(value_name = "CONFIG", value_hint = clap::ValueHint::FilePath)]
        config: String,
    },

    /// Supervise a container, started by the setuid helper
    #[command(hide = true)]
    Shim,

    /// List live instances whose application id matches these patterns
    /// (defaults to all)
    Ps {
        #[arg(value_name = "PATTERNS", num_args = 0..)]
        patterns: Vec<String>,
    },

    /// Print the stored record of one instance
    Show {
        /// Leading digits of the instance id
        #[arg(value_name = "INSTANCE", add = ArgValueCompleter::new(instance_completion))]
        prefix: String,
    },

    /// Print an example sandbox configuration
    Template,

    /// Get current settings
    Config {
        /// The keys to get from the settings
        #[arg(value_name = "KEYS", num_args = 0..)]
        keys: Option<Vec<String>>,
    },
}

pub fn instance_completion(
    current: &std::ffi::OsStr,
) -> Vec<CompletionCandidate> {
    let Some(current) = current.to_str() else {
        return vec![];
    };
    // the real command line is not parseable mid-completion
    let Ok(cli) = Args::try_parse_from(["rampart", "ps"]) else {
        return vec![];
    };
    let Ok(settings) = resolve_settings(&cli) else {
        return vec![];
    };
    let Ok(store) = crate::actions::open_store(&settings) else {
        return vec![];
    };
    let Ok(records) = store.all() else {
        return vec![];
    };

    records
        .iter()
        .map(|record| record.id.to_string())
        .filter(|id| id.starts_with(current))
        .map(CompletionCandidate::new)
        .collect()
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter, String> {
    s.parse::<log::LevelFilter>().map_err(|e| e.to_string())
}

#![allow(
    clippy::collapsible_else_if,
    clippy::collapsible_if,
    clippy::module_inception,
    clippy::needless_range_loop,
    clippy::result_map_unit_fn,
    clippy::useless_format
)]
#![deny(
    clippy::get_unwrap,
    clippy::panic,
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::used_underscore_binding,
    clippy::used_underscore_items
)]

mod actions;
mod config;
mod container;
mod dispatcher;
mod error;
mod logger;
mod outcome;
mod store;
mod system;
#[cfg(test)]
mod testing;
mod types;
mod util;

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use config::{Settings, cli, resolve_settings};
use dispatcher::{Direct, Dispatcher};
use log::{LevelFilter, Log};
use logger::RampartLogger;
use std::sync::Arc;
use util::{print_json_output, set_json_mode};

/** The shim never reads launcher settings, it runs as the sandbox user
 * and takes its verbosity from the setup payload.
 */
fn run_shim(logger: &RampartLogger, log_level: Option<LevelFilter>) -> ! {
    logger.set_prefix("shim");
    logger.set_level(log_level.unwrap_or(LevelFilter::Info));
    logger.print_deferred();
    let code = outcome::shim::run(Arc::new(Direct));
    Direct.exit(code)
}

fn dispatch(action: cli::Action, settings: &Settings) -> Result<()> {
    match action {
        cli::Action::Run { config } => {
            let code = actions::run(settings, &config)?;
            Direct.exit(code)
        }
        cli::Action::Ps { patterns } => {
            actions::ps(&actions::open_store(settings)?, &patterns)
        }
        cli::Action::Show { prefix } => {
            actions::show(&actions::open_store(settings)?, &prefix)
        }
        cli::Action::Template => actions::template(),
        cli::Action::Config { keys } => actions::config(settings, keys),
        cli::Action::Shim => {
            Err(anyhow!("the shim is started by the setuid helper"))
        }
    }
}

pub fn main() -> Result<()> {
    // Does not return when completion is requested.
    CompleteEnv::with_factory(cli::Args::command).complete();

    let logger = RampartLogger::new(LevelFilter::Trace)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let cli: cli::Args = cli::Args::parse();
    logger.set_level(cli.log_level.unwrap_or(LevelFilter::Info));

    if let cli::Action::Shim = cli.action {
        run_shim(logger, cli.log_level);
    }

    let settings = match resolve_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            logger.print_deferred();
            return Err(e.context("Resolving settings"));
        }
    };

    // Messages deferred while settings were loading are filtered by the
    // resolved level.
    logger.set_level(settings.log_level);
    logger.print_deferred();
    set_json_mode(cli.json);

    let result = dispatch(cli.action, &settings);
    if cli.json {
        print_json_output(&result)?;
        if result.is_err() {
            logger.flush();
            std::process::exit(1);
        }
    }
    logger.flush();
    result
}

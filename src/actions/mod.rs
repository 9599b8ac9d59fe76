mod config;
mod ps;
mod run;
mod show;
mod template;

pub use config::*;
pub use ps::*;
pub use run::*;
pub use show::*;
pub use template::*;

use crate::config::Settings;
use crate::dispatcher::Direct;
use crate::outcome::{Hsu, Paths};
use crate::store::Store;
use anyhow::{Context, Result};

/** Opens the instance store of the calling user. */
pub fn open_store(settings: &Settings) -> Result<Store> {
    let hsu = Hsu::new(settings.hsu_path.clone());
    let user_id = hsu.id(&Direct).context("Obtaining user id")?;
    Ok(Store::new(Paths::resolve(&Direct, user_id).store_path()))
}

mod bus_config;
mod enablement;
mod filesystem;
mod instance_id;
mod record;
mod sandbox_config;

pub use bus_config::*;
pub use enablement::*;
pub use filesystem::*;
pub use instance_id::*;
pub use record::*;
pub use sandbox_config::*;

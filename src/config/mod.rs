pub mod cli;
pub mod impls;
pub mod resolve;
pub mod structs;

pub use resolve::resolve_settings;
pub use structs::*;

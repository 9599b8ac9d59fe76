mod output;

pub use output::*;

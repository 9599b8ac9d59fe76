mod fixture_rampart;

pub use fixture_rampart::*;

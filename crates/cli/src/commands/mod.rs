//! CLI command implementations.

pub mod lifecycle;
pub mod run;
pub mod serve;

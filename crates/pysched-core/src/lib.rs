//! `pysched-core` — shared types, configuration, and validation helpers.
//!
//! Every other pysched crate depends on this one. It deliberately contains
//! no I/O beyond configuration loading: the store, scheduler, and runner
//! crates own their respective side effects.

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

pub use config::PyschedConfig;
pub use error::{PyschedError, Result};

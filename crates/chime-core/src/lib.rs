//! chime-core: configuration, errors and clock helpers shared by the
//! chime crates.

pub mod config;
pub mod error;
pub mod time;

pub use config::ChimeConfig;
pub use error::{ChimeError, Result};

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::toml_config::ServiceConfig;

pub use core::{drain::QueueDrainer, processor::RequestProcessor};
pub use utils::error::{BloodSearchError, Result};

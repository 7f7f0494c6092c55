pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ids;
pub mod merge;
mod metrics;
pub mod pipeline;
pub mod search;
mod server;
pub mod utils;

pub use config::{Config, FeaturesDir, Opts};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use search::SearchEngine;

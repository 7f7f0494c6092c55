mod merge;
mod process;
mod search;
pub mod server;

pub use merge::*;
pub use process::*;
pub use search::*;
pub use server::*;

use crate::config::Config;

pub trait SubCommandExtend {
    fn run(&self, config: &Config) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

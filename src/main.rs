use clap::Parser;

use clipsearch::cli::SubCommandExtend;
use clipsearch::config::{Opts, SubCommand};
use clipsearch::Config;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    let config = Config::load(&opts)?;

    match &opts.subcmd {
        SubCommand::Process(cmd) => cmd.run(&config).await,
        SubCommand::Merge(cmd) => cmd.run(&config).await,
        SubCommand::Search(cmd) => cmd.run(&config).await,
        SubCommand::Server(cmd) => cmd.run(&config).await,
    }
}

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Config;
use crate::merge::merge;

#[derive(Parser, Debug, Clone)]
pub struct MergeCommand {}

impl SubCommandExtend for MergeCommand {
    async fn run(&self, config: &Config) -> Result<()> {
        let report = block_in_place(|| merge(&config.features_dir()))?;
        info!("合并成功: {} 个批次, 共 {} 张图片", report.batches, report.rows);
        Ok(())
    }
}

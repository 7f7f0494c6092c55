use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Config;
use crate::encoder::load_encoder;
use crate::merge::merge;
use crate::pipeline::Pipeline;
use crate::utils::{compile_globs, scan_images};

#[derive(Parser, Debug, Clone)]
pub struct ProcessCommand {
    /// 文件列表发生变化后，删除并重新计算内容已过期的批次
    #[arg(long)]
    pub rebuild_stale: bool,
}

impl SubCommandExtend for ProcessCommand {
    async fn run(&self, config: &Config) -> Result<()> {
        block_in_place(|| {
            let re_name = compile_globs(&config.ext_list)?;
            let files = scan_images(&config.photos_path, &re_name)?;
            println!("Photos found: {}", files.len());

            let encoder = load_encoder(&config.model)?;
            let report =
                Pipeline::new(config, encoder).rebuild_stale(self.rebuild_stale).run(&files)?;
            if !report.failed.is_empty() {
                warn!("以下批次处理失败，将在下次运行时重试: {:?}", report.failed);
            }
            if !report.locked.is_empty() {
                warn!("以下批次正被其他进程处理，未包含在本次合并中: {:?}", report.locked);
            }

            let merged = merge(&config.features_dir())?;
            info!("索引已更新: {} 个批次, 共 {} 张图片", merged.batches, merged.rows);
            Ok(())
        })
    }
}

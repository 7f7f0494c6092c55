use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::error;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Config;
use crate::encoder::{Encoder, load_encoder};
use crate::search::SearchEngine;
use crate::utils::read_line;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 查询文本，可以有多条，不提供时进入交互模式
    pub query: Vec<String>,
    /// 显示的结果数量，默认使用配置中的 display_num
    #[arg(long, value_name = "COUNT")]
    pub count: Option<usize>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, config: &Config) -> Result<()> {
        let count = self.count.unwrap_or(config.display_num);
        if count == 0 {
            bail!("结果数量必须大于 0");
        }

        block_in_place(|| {
            // 索引不可用时在进入交互前就报错
            let engine = SearchEngine::open(&config.features_dir())?;
            let encoder = load_encoder(&config.model)?;

            if self.query.is_empty() {
                return interactive(&engine, &*encoder, count, &self.output_format);
            }
            for query in &self.query {
                let result = engine.search_text(&*encoder, query, count, None)?;
                print_result(&result, &self.output_format)?;
            }
            Ok(())
        })
    }
}

/// 交互式查询，输入空行或 EOF 时退出
fn interactive(
    engine: &SearchEngine,
    encoder: &dyn Encoder,
    count: usize,
    format: &OutputFormat,
) -> Result<()> {
    println!("Photos found: {}", engine.len());
    println!("press Enter to quit");

    loop {
        let query = read_line("> ")?;
        if query.is_empty() {
            break;
        }
        // 单条查询失败不影响后续查询
        match engine.search_text(encoder, &query, count, None) {
            Ok(result) => print_result(&result, format)?,
            Err(e) => error!("查询失败: {}", e),
        }
    }
    Ok(())
}

fn print_result(result: &[(f32, String)], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (k, v) in result {
                println!("{:.4}\t{}", k, v);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::{ComputeOptions, IndexOptions, Opts, ScanOptions, StalePolicy};
use crate::encoder::ThumbnailEncoder;
use crate::engine::{EngineBuilder, Query, QueryOutcome};
use crate::rank::SearchHit;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub compute: ComputeOptions,
    /// 被搜索的目录
    pub root: PathBuf,
    /// 文本查询
    #[arg(short, long)]
    pub text: Option<String>,
    /// 图片查询
    #[arg(short, long, value_name = "PATH")]
    pub image: Option<PathBuf>,
    /// 显示的结果数量
    #[arg(short = 'n', long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 归档过期时自动重建索引
    #[arg(long)]
    pub auto_reindex: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let encoder = ThumbnailEncoder::new(&self.compute)?;
        let engine = EngineBuilder::new(&self.root)
            .index_options(self.index.clone())
            .scan_options(self.scan.clone())
            .batch_size(self.compute.batch_size)
            .stale_policy(StalePolicy::from_auto_reindex(self.auto_reindex))
            .open(encoder)?;

        let query = Query { text: self.text.clone(), image: self.image.clone(), count: Some(self.count) };
        match engine.query_flow(&query)? {
            QueryOutcome::Ranked(hits) => print_result(&hits, self.output_format),
            QueryOutcome::NeedsIndexing => {
                eprintln!("目录尚未建立索引，请先运行 picsearch index {}", self.root.display());
                Ok(())
            }
        }
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}", hit.distance, hit.path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

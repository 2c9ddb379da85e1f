use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{ComputeOptions, IndexOptions, Opts, ScanOptions};
use crate::encoder::ThumbnailEncoder;
use crate::engine::EngineBuilder;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub compute: ComputeOptions,
    /// 图片所在目录
    pub root: PathBuf,
}

impl SubCommandExtend for IndexCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let encoder = ThumbnailEncoder::new(&self.compute)?;
        let engine = EngineBuilder::new(&self.root)
            .index_options(self.index.clone())
            .scan_options(self.scan.clone())
            .batch_size(self.compute.batch_size)
            .open(encoder)?;

        let report = engine.index_flow()?;
        info!(
            "索引完成：共 {} 张图片，复用 {}，新编码 {}，跳过 {}",
            report.total, report.reused, report.encoded, report.rejected
        );

        println!("{}", report.archive_path.display());
        println!("{}", report.index_path.display());
        Ok(())
    }
}

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{ComputeOptions, IndexOptions, Opts, ScanOptions};
use crate::encoder::ThumbnailEncoder;
use crate::engine::EngineBuilder;
use crate::index::index_path;

#[derive(Parser, Debug, Clone)]
pub struct StatCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 图片所在目录
    pub root: PathBuf,
}

impl SubCommandExtend for StatCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let encoder = ThumbnailEncoder::new(&ComputeOptions { threads: 1, batch_size: 1 })?;
        let engine = EngineBuilder::new(&self.root)
            .index_options(self.index.clone())
            .scan_options(self.scan.clone())
            .open(encoder)?;

        let status = engine.status()?;
        let index = match status.index {
            Some(n) => n.to_string(),
            None => "-".to_string(),
        };

        println!("归档\t{}\t{}", status.archive, engine.root().archive().display());
        println!("索引\t{}\t{}", index, index_path(engine.root(), self.index.backend).display());
        println!("图片\t{}", status.on_disk);
        println!("状态\t{}", status.staleness);
        Ok(())
    }
}

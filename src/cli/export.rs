use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::{ComputeOptions, Opts};
use crate::encoder::ThumbnailEncoder;
use crate::engine::EngineBuilder;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 图片所在目录
    pub root: PathBuf,
    /// 输出文件
    #[arg(short, long, default_value = "embeddings.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let encoder = ThumbnailEncoder::new(&ComputeOptions { threads: 1, batch_size: 1 })?;
        let engine = EngineBuilder::new(&self.root).open(encoder)?;

        let data = engine.export()?;
        write_npy(&self.output, &data)?;
        info!("导出 {} 个向量到 {}", data.nrows(), self.output.display());
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::archive::EMBEDDING_DIM;
use crate::cli::*;
use crate::index::IndexBackend;

/// 默认扫描的图片后缀
pub const DEFAULT_EXTENSIONS: &str = "jpg,jpeg,png,ppm,bmp,pgm,tif,tiff,webp";

/// 持久化文件的公共前缀
const STATE_PREFIX: &str = ".picsearch";

#[derive(Parser, Debug, Clone)]
#[command(name = "picsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 运行结束后将 prometheus 指标打印到标准错误
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 为目录中的图片建立索引
    Index(IndexCommand),
    /// 在已索引的目录中搜索图片
    Search(SearchCommand),
    /// 查看归档与索引的状态
    Stat(StatCommand),
    /// 导出所有嵌入向量为 npy 矩阵
    Export(ExportCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = DEFAULT_EXTENSIONS)]
    pub suffix: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { suffix: DEFAULT_EXTENSIONS.to_string() }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 空间索引的实现
    #[arg(long, value_enum, default_value_t = IndexBackend::Hnsw)]
    pub backend: IndexBackend,
    /// HNSW 每个节点的最大连接数
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub max_nb_connection: usize,
    /// HNSW 最大层数，不超过 16
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub max_layer: usize,
    /// 构建索引时每次访问的节点数量
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub ef_construction: usize,
    /// 搜索时每次访问的节点数量
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub ef_search: usize,
    /// 向量维数，由编码器决定
    #[arg(skip = EMBEDDING_DIM)]
    pub dim: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Hnsw,
            max_nb_connection: 16,
            max_layer: 16,
            ef_construction: 200,
            ef_search: 64,
            dim: EMBEDDING_DIM,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ComputeOptions {
    /// 编码图片使用的线程数
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub threads: usize,
    /// 每个批次编码的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 64)]
    pub batch_size: usize,
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self { threads: num_cpus::get(), batch_size: 64 }
    }
}

/// 查询时发现归档过期后的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// 仅输出警告，继续使用旧的归档查询
    #[default]
    Warn,
    /// 自动重建索引后再查询
    Reindex,
}

impl StalePolicy {
    pub fn from_auto_reindex(auto_reindex: bool) -> Self {
        if auto_reindex { Self::Reindex } else { Self::Warn }
    }
}

/// 被索引的根目录，同时也是持久化文件的存放位置
#[derive(Debug, Clone)]
pub struct RootDir {
    path: PathBuf,
}

impl RootDir {
    /// 打开一个已存在的目录，路径会被规范化为绝对路径
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = path
            .canonicalize()
            .with_context(|| format!("无法打开目录: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回归档文件的路径
    pub fn archive(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.archive"))
    }

    /// 返回归档临时文件的路径
    pub fn archive_tmp(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.archive.tmp"))
    }

    /// hnsw_rs 使用的文件名前缀
    pub fn hnsw_basename(&self) -> &'static str {
        STATE_PREFIX
    }

    /// 返回 HNSW 图文件的路径
    pub fn hnsw_graph(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.hnsw.graph"))
    }

    /// 返回 HNSW 数据文件的路径
    pub fn hnsw_data(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.hnsw.data"))
    }

    /// 返回 usearch 索引文件的路径
    pub fn usearch(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.usearch"))
    }

    /// 返回锁文件的路径
    pub fn lock(&self) -> PathBuf {
        self.path.join(format!("{STATE_PREFIX}.lock"))
    }
}

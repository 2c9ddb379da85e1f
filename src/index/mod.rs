mod hnsw;
mod usearch;

use std::path::PathBuf;

use anyhow::Result;
use clap::ValueEnum;
use log::info;

pub use self::hnsw::HnswIndex;
pub use self::usearch::USearchIndex;
use crate::archive::{Archive, ArchiveEntry};
use crate::config::{IndexOptions, RootDir};
use crate::error::Error;

/// 空间索引的实现
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexBackend {
    /// hnsw_rs，纯 Rust 实现
    #[default]
    Hnsw,
    /// usearch
    Usearch,
}

/// 一个近邻结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 归档编号
    pub index: usize,
    /// 余弦距离，越小越相似
    pub distance: f32,
}

/// 基于角距离的近似最近邻索引，索引中的编号与归档编号一一对应
///
/// 只支持一次性构建，构建完成后只读
pub trait SpatialIndex {
    /// 使用归档中的所有向量构建索引
    fn build(archive: &Archive, opts: &IndexOptions) -> Result<Self>
    where
        Self: Sized;

    /// 从目录中加载索引，索引文件不存在时返回 None
    fn open(root: &RootDir, opts: &IndexOptions) -> Result<Option<Self>>
    where
        Self: Sized;

    /// 保存索引，返回索引文件路径
    fn save(&self, root: &RootDir) -> Result<PathBuf>;

    /// 搜索最接近的 k 个向量，按距离从小到大排列
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// 索引中的向量数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 检查归档编号是否恰好为 `[0, N)` 且所有向量维数一致
///
/// 任何不一致都说明合并过程存在 bug，不能忽略
pub fn validate(entries: &[ArchiveEntry], dim: usize) -> Result<(), Error> {
    for (i, entry) in entries.iter().enumerate() {
        if entry.index != i {
            return Err(Error::IndexGap { expected: i, found: entry.index });
        }
        if entry.embedding.len() != dim {
            return Err(Error::DimensionMismatch {
                context: format!("归档条目 {} ({})", i, entry.identity_key),
                expected: dim,
                found: entry.embedding.len(),
            });
        }
    }
    Ok(())
}

/// 检查查询向量维数
pub fn check_dim(query: &[f32], dim: usize) -> Result<(), Error> {
    if query.len() != dim {
        return Err(Error::DimensionMismatch {
            context: "查询向量".to_string(),
            expected: dim,
            found: query.len(),
        });
    }
    Ok(())
}

/// 使用指定的实现构建索引
pub fn build(archive: &Archive, opts: &IndexOptions) -> Result<Box<dyn SpatialIndex>> {
    info!("构建 {:?} 索引，共 {} 个向量", opts.backend, archive.len());
    Ok(match opts.backend {
        IndexBackend::Hnsw => Box::new(HnswIndex::build(archive, opts)?),
        IndexBackend::Usearch => Box::new(USearchIndex::build(archive, opts)?),
    })
}

/// 使用指定的实现加载索引
pub fn open(root: &RootDir, opts: &IndexOptions) -> Result<Option<Box<dyn SpatialIndex>>> {
    Ok(match opts.backend {
        IndexBackend::Hnsw => {
            HnswIndex::open(root, opts)?.map(|index| Box::new(index) as Box<dyn SpatialIndex>)
        }
        IndexBackend::Usearch => {
            USearchIndex::open(root, opts)?.map(|index| Box::new(index) as Box<dyn SpatialIndex>)
        }
    })
}

/// 索引文件路径
pub fn index_path(root: &RootDir, backend: IndexBackend) -> PathBuf {
    match backend {
        IndexBackend::Hnsw => root.hnsw_graph(),
        IndexBackend::Usearch => root.usearch(),
    }
}

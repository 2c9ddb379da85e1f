use anyhow::Result;
use log::debug;
use serde::Serialize;

use crate::archive::{Archive, Embedding};
use crate::error::Error;
use crate::index::SpatialIndex;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 余弦距离
    pub distance: f32,
    /// 图片路径
    pub path: String,
}

/// 合并文本与图片查询向量，两者都存在时逐元素相加
pub fn combine(text: Option<Embedding>, image: Option<Embedding>) -> Result<Option<Embedding>, Error> {
    match (text, image) {
        (Some(mut t), Some(i)) => {
            if t.len() != i.len() {
                return Err(Error::DimensionMismatch {
                    context: "文本与图片查询向量".to_string(),
                    expected: t.len(),
                    found: i.len(),
                });
            }
            t.iter_mut().zip(i).for_each(|(a, b)| *a += b);
            Ok(Some(t))
        }
        (t, i) => Ok(t.or(i)),
    }
}

/// 按距离从近到远返回归档编号，k 为 None 时返回全部
pub fn rank(query: &[f32], index: &dyn SpatialIndex, k: Option<usize>) -> Result<Vec<usize>> {
    Ok(neighbors(query, index, k)?.into_iter().map(|(_, i)| i).collect())
}

/// 将编号转换为图片路径，归档中不存在的编号会被丢弃
pub fn resolve(archive: &Archive, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|&i| archive.get(i).map(|entry| entry.path.clone()))
        .collect()
}

/// 与 [`rank`] 相同，但同时返回距离
pub fn rank_scored(
    query: &[f32],
    index: &dyn SpatialIndex,
    archive: &Archive,
    k: Option<usize>,
) -> Result<Vec<SearchHit>> {
    let hits = neighbors(query, index, k)?
        .into_iter()
        .filter_map(|(distance, i)| {
            let entry = archive.get(i);
            if entry.is_none() {
                debug!("索引中的编号 {i} 不在归档中");
            }
            entry.map(|entry| SearchHit { distance, path: entry.path.clone() })
        })
        .collect();
    Ok(hits)
}

fn neighbors(query: &[f32], index: &dyn SpatialIndex, k: Option<usize>) -> Result<Vec<(f32, usize)>> {
    let k = k.unwrap_or(index.len());
    let mut neighbors = index
        .search(query, k)?
        .into_iter()
        .map(|n| (n.distance, n.index))
        .collect::<Vec<_>>();
    neighbors.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(neighbors)
}

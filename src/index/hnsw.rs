use std::path::PathBuf;

use anyhow::{Context, Result};
use hnsw_rs::prelude::*;
use log::debug;

use super::{Neighbor, SpatialIndex, check_dim, validate};
use crate::archive::Archive;
use crate::config::{IndexOptions, RootDir};

pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    dim: usize,
    ef_search: usize,
}

impl SpatialIndex for HnswIndex {
    fn build(archive: &Archive, opts: &IndexOptions) -> Result<Self> {
        validate(archive.entries(), opts.dim)?;

        let mut hnsw = Hnsw::<f32, _>::new(
            opts.max_nb_connection,
            archive.len().max(1),
            opts.max_layer.clamp(1, 16),
            opts.ef_construction,
            DistCosine,
        );
        for entry in archive.iter() {
            hnsw.insert((entry.embedding.as_slice(), entry.index));
        }
        hnsw.set_searching_mode(true);

        Ok(Self { hnsw, dim: opts.dim, ef_search: opts.ef_search })
    }

    fn open(root: &RootDir, opts: &IndexOptions) -> Result<Option<Self>> {
        if !root.hnsw_graph().exists() || !root.hnsw_data().exists() {
            return Ok(None);
        }
        let reloader = HnswIo::new(root.path(), root.hnsw_basename());
        // NOTE: 加载出的 HNSW 生命周期依赖于 reloader，所以需要使用 Box::leak 来延长生命周期，
        // 每次加载都会泄漏一个 reloader
        let reloader = Box::leak(Box::new(reloader));
        let hnsw: Hnsw<'static, f32, DistCosine> = reloader
            .load_hnsw_with_dist(DistCosine)
            .with_context(|| format!("无法加载索引: {}", root.hnsw_graph().display()))?;
        debug!("从 {} 加载了 {} 个向量", root.hnsw_graph().display(), hnsw.get_nb_point());

        Ok(Some(Self { hnsw, dim: opts.dim, ef_search: opts.ef_search }))
    }

    fn save(&self, root: &RootDir) -> Result<PathBuf> {
        for path in [root.hnsw_graph(), root.hnsw_data()] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        // hnsw_rs 无法导出空图，此时不写入文件，查询时视为无索引
        if self.is_empty() {
            debug!("索引为空，跳过保存");
        } else {
            self.hnsw.file_dump(root.path(), root.hnsw_basename())?;
        }
        Ok(root.hnsw_graph())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dim(query, self.dim)?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(vec![]);
        }
        let neighbors = self
            .hnsw
            .search(query, k, self.ef_search.max(k))
            .into_iter()
            .map(|n| Neighbor { index: n.d_id, distance: n.distance })
            .collect();
        Ok(neighbors)
    }

    fn len(&self) -> usize {
        self.hnsw.get_nb_point()
    }
}

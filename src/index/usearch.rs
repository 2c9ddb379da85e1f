use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use usearch::{Index, MetricKind, ScalarKind};

use super::{Neighbor, SpatialIndex, check_dim, validate};
use crate::archive::Archive;
use crate::config::{IndexOptions, RootDir};
use crate::error::Error;

pub struct USearchIndex {
    index: Index,
    dim: usize,
}

impl USearchIndex {
    fn new(opts: &IndexOptions) -> Result<Self> {
        let options = usearch::IndexOptions {
            dimensions: opts.dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: opts.max_nb_connection,
            expansion_add: opts.ef_construction,
            expansion_search: opts.ef_search,
            ..Default::default()
        };
        let index = Index::new(&options)?;
        Ok(Self { index, dim: opts.dim })
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().with_context(|| format!("路径不是合法的 UTF-8: {}", path.display()))
}

impl SpatialIndex for USearchIndex {
    fn build(archive: &Archive, opts: &IndexOptions) -> Result<Self> {
        validate(archive.entries(), opts.dim)?;

        let s = Self::new(opts)?;
        s.index.reserve(archive.len())?;
        for entry in archive.iter() {
            s.index.add(entry.index as u64, entry.embedding.as_slice())?;
        }
        Ok(s)
    }

    fn open(root: &RootDir, opts: &IndexOptions) -> Result<Option<Self>> {
        let path = root.usearch();
        if !path.exists() {
            return Ok(None);
        }
        let s = Self::new(opts)?;
        s.index.load(path_str(&path)?)?;
        if s.index.dimensions() != opts.dim {
            return Err(Error::DimensionMismatch {
                context: format!("索引文件 {}", path.display()),
                expected: opts.dim,
                found: s.index.dimensions(),
            }
            .into());
        }
        debug!("从 {} 加载了 {} 个向量", path.display(), s.index.size());
        Ok(Some(s))
    }

    fn save(&self, root: &RootDir) -> Result<PathBuf> {
        let path = root.usearch();
        self.index.save(path_str(&path)?)?;
        Ok(path)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dim(query, self.dim)?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(vec![]);
        }
        let matches = self.index.search(query, k)?;
        let neighbors = matches
            .keys
            .into_iter()
            .zip(matches.distances)
            .map(|(key, distance)| Neighbor { index: key as usize, distance })
            .collect();
        Ok(neighbors)
    }

    fn len(&self) -> usize {
        self.index.size()
    }
}

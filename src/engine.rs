use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::Array2;
use regex::Regex;

use crate::archive::{Archive, Embedding};
use crate::catalog::{self, ImageRecord, ImageVerifier};
use crate::config::{IndexOptions, RootDir, ScanOptions, StalePolicy};
use crate::encoder::Encoder;
use crate::error::Error;
use crate::index::{self, IndexBackend, SpatialIndex};
use crate::lock::RootLock;
use crate::merge::merge;
use crate::metrics;
use crate::rank::{self, SearchHit};
use crate::reconcile::{Reconciliation, reconcile};
use crate::utils::{TimeMeasure, pb_style};

pub struct EngineBuilder {
    root: PathBuf,
    index: IndexOptions,
    scan: ScanOptions,
    batch_size: usize,
    policy: StalePolicy,
}

impl EngineBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            index: IndexOptions::default(),
            scan: ScanOptions::default(),
            batch_size: 64,
            policy: StalePolicy::default(),
        }
    }

    /// 空间索引参数
    pub fn index_options(mut self, index: IndexOptions) -> Self {
        self.index = index;
        self
    }

    /// 空间索引的实现
    pub fn backend(mut self, backend: IndexBackend) -> Self {
        self.index.backend = backend;
        self
    }

    /// 扫描参数
    pub fn scan_options(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// 扫描的文件后缀名，逗号分隔
    pub fn extensions(mut self, suffix: impl Into<String>) -> Self {
        self.scan.suffix = suffix.into();
        self
    }

    /// 每个批次编码的图片数量
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 查询时发现归档过期后的处理方式
    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn open<E: Encoder>(self, encoder: E) -> Result<Engine<E>> {
        let root = RootDir::new(&self.root)?;
        let re_suf = catalog::suffix_regex(&self.scan.suffix)
            .with_context(|| format!("无效的后缀列表: {}", self.scan.suffix))?;
        let mut index = self.index;
        index.dim = encoder.dim();

        Ok(Engine { root, encoder, index, re_suf, batch_size: self.batch_size, policy: self.policy })
    }
}

/// 一个根目录上的索引与查询入口
///
/// 每次查询都会重新加载归档和索引。hnsw_rs 加载出的图借用了读取器，
/// 读取器会被泄漏以获得 `'static` 生命周期，所以在同一进程中反复查询时
/// 每次加载都会留下一份读取器的内存。
pub struct Engine<E> {
    root: RootDir,
    encoder: E,
    index: IndexOptions,
    re_suf: Regex,
    batch_size: usize,
    policy: StalePolicy,
}

/// 一次索引的结果
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub archive_path: PathBuf,
    pub index_path: PathBuf,
    /// 归档中的图片总数
    pub total: usize,
    /// 复用的向量数量
    pub reused: usize,
    /// 新编码的图片数量
    pub encoded: usize,
    /// 无法解码的图片数量
    pub rejected: usize,
}

/// 一次查询，文本与图片至少需要一个
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: Option<String>,
    pub image: Option<PathBuf>,
    /// 返回的结果数量，None 表示全部
    pub count: Option<usize>,
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self { image: Some(path.into()), ..Default::default() }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    fn validate(&self) -> Result<(), Error> {
        match (&self.text, &self.image) {
            (None, None) => Err(Error::NoQuery),
            (Some(text), _) if text.trim().is_empty() => Err(Error::EmptyQuery),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// 按相似度从高到低排列的结果
    Ranked(Vec<SearchHit>),
    /// 目录尚未建立索引
    NeedsIndexing,
}

impl QueryOutcome {
    /// 结果中的图片路径，需要索引时为空
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::Ranked(hits) => hits.iter().map(|hit| hit.path.clone()).collect(),
            Self::NeedsIndexing => vec![],
        }
    }
}

/// 归档、索引与磁盘上的图片是否一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// 索引文件不存在
    MissingIndex,
    /// 索引与归档的数量不一致
    IndexMismatch { archive: usize, index: usize },
    /// 归档与磁盘上的图片不一致
    CatalogMismatch { archive: usize, on_disk: usize },
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        *self != Self::Fresh
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "最新"),
            Self::MissingIndex => write!(f, "索引不存在"),
            Self::IndexMismatch { archive, index } => {
                write!(f, "归档中有 {archive} 个向量，索引中有 {index} 个")
            }
            Self::CatalogMismatch { archive, on_disk } => {
                write!(f, "归档中有 {archive} 张图片，磁盘上有 {on_disk} 张")
            }
        }
    }
}

/// 判断归档是否过期
///
/// 除了数量之外，归档中任何一个 identity_key 不在磁盘上也视为过期。
/// 归档中记录为无法解码的图片不参与比较。
pub fn staleness(
    archive: &Archive,
    index: Option<&dyn SpatialIndex>,
    catalog: &[ImageRecord],
) -> Staleness {
    let Some(index) = index else {
        return if archive.is_empty() && catalog.iter().all(|r| archive.is_rejected(&r.identity_key)) {
            Staleness::Fresh
        } else {
            Staleness::MissingIndex
        };
    };
    if index.len() != archive.len() {
        return Staleness::IndexMismatch { archive: archive.len(), index: index.len() };
    }

    let on_disk = catalog
        .iter()
        .map(|r| r.identity_key.as_str())
        .filter(|key| archive.contains_key(key) || !archive.is_rejected(key))
        .collect::<HashSet<_>>();
    if on_disk.len() != archive.len()
        || archive.iter().any(|entry| !on_disk.contains(entry.identity_key.as_str()))
    {
        return Staleness::CatalogMismatch { archive: archive.len(), on_disk: catalog.len() };
    }
    Staleness::Fresh
}

/// 目录的当前状态
#[derive(Debug, Clone)]
pub struct Status {
    pub archive: usize,
    pub index: Option<usize>,
    pub on_disk: usize,
    pub staleness: Staleness,
}

impl<E: Encoder> Engine<E> {
    pub fn root(&self) -> &RootDir {
        &self.root
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// 扫描根目录中的所有图片
    pub fn scan(&self) -> Vec<ImageRecord> {
        catalog::scan(self.root.path(), self.re_suf.clone()).collect()
    }

    pub fn load_archive(&self) -> Result<Archive> {
        Archive::load(self.root.archive())
    }

    pub fn load_index(&self) -> Result<Option<Box<dyn SpatialIndex>>> {
        index::open(&self.root, &self.index)
    }

    /// 扫描、对比归档、编码新图片、合并并重建索引，最后保存归档和索引
    pub fn index_flow(&self) -> Result<IndexReport> {
        let _lock = RootLock::exclusive(self.root.lock())?;
        let start = Instant::now();
        let mut tm = TimeMeasure::new();

        info!("开始扫描目录: {}", self.root.path().display());
        let catalog = tm.measure("scan", || self.scan());
        info!("扫描完成，共 {} 张图片", catalog.len());

        let archive = match self.load_archive() {
            Ok(archive) if archive.dim().is_some_and(|dim| dim != self.encoder.dim()) => {
                warn!("归档向量维数与编码器不一致，将重新编码所有图片");
                Archive::new()
            }
            Ok(archive) => archive,
            Err(e) => {
                warn!("无法读取归档，将重新编码所有图片: {e:#}");
                Archive::new()
            }
        };
        info!("加载了 {} 个已有向量", archive.len());

        let Reconciliation { reusable, new_records, rejected } =
            tm.measure("reconcile", || reconcile(&catalog, archive, &ImageVerifier));
        let reused = reusable.len();
        info!("复用 {} 个向量，需要编码 {} 张新图片", reused, new_records.len());

        let (new_records, new_embeddings, failed) =
            tm.measure("encode", || self.encode_new(new_records))?;
        let encoded = new_records.len();
        let rejected = rejected.into_iter().chain(failed).collect::<Vec<_>>();

        let archive = merge(reusable, new_records, new_embeddings)?.with_rejected(rejected.iter().cloned());
        let index = tm.measure("build", || index::build(&archive, &self.index))?;

        let index_path = tm.measure("save", || -> Result<PathBuf> {
            archive.save(self.root.archive(), self.root.archive_tmp())?;
            index.save(&self.root)
        })?;

        metrics::inc_reused(reused);
        metrics::inc_encoded(encoded);
        metrics::inc_rejected(rejected.len());
        metrics::observe_index(start.elapsed().as_secs_f64());
        for (stage, elapsed) in tm.sorted() {
            debug!("{stage}: {:.2}s", elapsed.as_secs_f32());
        }

        Ok(IndexReport {
            archive_path: self.root.archive(),
            index_path,
            total: archive.len(),
            reused,
            encoded,
            rejected: rejected.len(),
        })
    }

    /// 分批解码并编码新图片
    ///
    /// 解码失败的图片会被跳过并返回其 identity_key，返回的图片与向量一一对应
    fn encode_new(
        &self,
        records: Vec<ImageRecord>,
    ) -> Result<(Vec<ImageRecord>, Vec<Embedding>, Vec<String>)> {
        let pb = ProgressBar::new(records.len() as u64).with_style(pb_style());
        let mut kept = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());
        let mut failed = vec![];

        for chunk in records.chunks(self.batch_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            let mut images = Vec::with_capacity(chunk.len());
            for record in chunk {
                match catalog::decode(&record.path) {
                    Ok(image) => {
                        batch.push(record.clone());
                        images.push(image);
                    }
                    Err(e) => {
                        pb.println(format!("跳过图片: {e}"));
                        warn!("跳过图片: {e}");
                        failed.push(record.identity_key.clone());
                    }
                }
            }
            if images.is_empty() {
                pb.inc(chunk.len() as u64);
                continue;
            }

            let vectors = self.encoder.encode_images(&images)?;
            if vectors.len() != images.len() {
                return Err(Error::EmbeddingCountMismatch {
                    records: images.len(),
                    embeddings: vectors.len(),
                }
                .into());
            }
            if let Some((record, v)) =
                batch.iter().zip(&vectors).find(|(_, v)| v.len() != self.encoder.dim())
            {
                return Err(Error::DimensionMismatch {
                    context: format!("编码器输出 {}", record.path.display()),
                    expected: self.encoder.dim(),
                    found: v.len(),
                }
                .into());
            }

            if let Some(last) = batch.last() {
                pb.set_message(last.path.display().to_string());
            }
            kept.extend(batch);
            embeddings.extend(vectors);
            pb.inc(chunk.len() as u64);
        }

        pb.finish_with_message("编码完成");
        Ok((kept, embeddings, failed))
    }

    /// 查询归档、索引与磁盘的状态
    pub fn status(&self) -> Result<Status> {
        let (archive, index) = {
            let _lock = RootLock::shared(self.root.lock())?;
            (self.load_archive()?, self.load_index()?)
        };
        let catalog = self.scan();
        Ok(Status {
            archive: archive.len(),
            index: index.as_ref().map(|index| index.len()),
            on_disk: catalog.len(),
            staleness: staleness(&archive, index.as_deref(), &catalog),
        })
    }

    /// 加载归档和索引，检查是否过期，编码查询并返回排序后的结果
    pub fn query_flow(&self, query: &Query) -> Result<QueryOutcome> {
        query.validate()?;
        let start = Instant::now();

        let (mut archive, mut index) = {
            let _lock = RootLock::shared(self.root.lock())?;
            (self.load_archive()?, self.load_index()?)
        };
        let catalog = self.scan();

        let state = staleness(&archive, index.as_deref(), &catalog);
        if state.is_stale() {
            match self.policy {
                StalePolicy::Warn => warn!("归档已过期（{state}），请重新建立索引"),
                StalePolicy::Reindex => {
                    info!("归档已过期（{state}），重新建立索引");
                    self.index_flow()?;
                    let _lock = RootLock::shared(self.root.lock())?;
                    archive = self.load_archive()?;
                    index = self.load_index()?;
                }
            }
        }

        // 空归档不会生成索引文件，归档存在即说明已经索引过
        let Some(index) = index else {
            if archive.is_empty() && (catalog.is_empty() || self.root.archive().exists()) {
                return Ok(QueryOutcome::Ranked(vec![]));
            }
            return Ok(QueryOutcome::NeedsIndexing);
        };
        if let Some(dim) = archive.dim().filter(|&dim| dim != self.encoder.dim()) {
            return Err(Error::DimensionMismatch {
                context: format!("归档 {}", self.root.archive().display()),
                expected: self.encoder.dim(),
                found: dim,
            }
            .into());
        }

        let query_vec = self.encode_query(query)?;
        info!("在 {} 张图片中搜索", archive.len());
        let hits = rank::rank_scored(&query_vec, &*index, &archive, query.count)?;

        let elapsed = start.elapsed().as_secs_f64();
        metrics::observe_query(elapsed);
        debug!("查询耗时: {elapsed:.2}s");

        Ok(QueryOutcome::Ranked(hits))
    }

    fn encode_query(&self, query: &Query) -> Result<Embedding> {
        let text = query.text.as_deref().map(|text| self.encoder.encode_text(text)).transpose()?;
        let image = match &query.image {
            Some(path) => {
                let image = catalog::decode(path)?;
                Some(self.encoder.encode_image(&image)?)
            }
            None => None,
        };
        Ok(rank::combine(text, image)?.ok_or(Error::NoQuery)?)
    }

    /// 导出归档中的所有向量，每行一个
    pub fn export(&self) -> Result<Array2<f32>> {
        let archive = {
            let _lock = RootLock::shared(self.root.lock())?;
            self.load_archive()?
        };
        let dim = archive.dim().unwrap_or(self.encoder.dim());
        let data = archive.iter().flat_map(|entry| entry.embedding.iter().copied()).collect();
        Ok(Array2::from_shape_vec((archive.len(), dim), data)?)
    }
}

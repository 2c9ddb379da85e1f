use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// 嵌入向量的维数
pub const EMBEDDING_DIM: usize = 512;

/// 当前归档文件格式版本
pub const ARCHIVE_VERSION: u32 = 2;

pub type Embedding = Vec<f32>;

/// 归档中的一张图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// 在归档中的编号，同时也是空间索引中的编号
    pub index: usize,
    /// 文件名 + 修改时间
    pub identity_key: String,
    /// 图片路径
    pub path: String,
    /// 嵌入向量
    pub embedding: Embedding,
}

/// 归档文件的磁盘格式
#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    version: u32,
    entries: Vec<ArchiveEntry>,
    rejected: Vec<String>,
}

/// 编号 => 图片的映射，编号总是连续的 `[0, N)`
///
/// 条目按编号顺序存放在数组中，另外维护一张 identity_key => 编号 的查找表。
/// 无法解码的图片不在条目中，只记录其 identity_key，避免每次都被视为新图片。
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
    keys: HashMap<String, usize>,
    rejected: BTreeSet<String>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从一组条目构造归档，条目的编号必须恰好为 `0..entries.len()`
    pub fn from_entries(mut entries: Vec<ArchiveEntry>) -> Result<Self, Error> {
        entries.sort_by_key(|entry| entry.index);

        let mut keys = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.index != i {
                return Err(Error::IndexGap { expected: i, found: entry.index });
            }
            keys.insert(entry.identity_key.clone(), i);
        }

        Ok(Self { entries, keys, rejected: BTreeSet::new() })
    }

    /// 从文件中加载归档，文件不存在时返回空归档
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("归档不存在: {}", path.display());
            return Ok(Self::new());
        }

        let reader = BufReader::new(
            File::open(path).with_context(|| format!("无法打开归档: {}", path.display()))?,
        );
        let file: ArchiveFile = bincode::deserialize_from(reader)
            .with_context(|| format!("无法解析归档: {}", path.display()))?;
        if file.version != ARCHIVE_VERSION {
            return Err(Error::ArchiveVersion { expected: ARCHIVE_VERSION, found: file.version }.into());
        }

        let archive = Self::from_entries(file.entries)?.with_rejected(file.rejected);
        debug!("从 {} 加载了 {} 个向量", path.display(), archive.len());
        Ok(archive)
    }

    /// 保存归档，先写入临时文件再重命名
    pub fn save(&self, path: impl AsRef<Path>, tmp_path: impl AsRef<Path>) -> Result<()> {
        let (path, tmp_path) = (path.as_ref(), tmp_path.as_ref());

        let mut writer = BufWriter::new(
            File::create(tmp_path)
                .with_context(|| format!("无法创建文件: {}", tmp_path.display()))?,
        );
        let file = ArchiveFile {
            version: ARCHIVE_VERSION,
            entries: self.entries.clone(),
            rejected: self.rejected.iter().cloned().collect(),
        };
        bincode::serialize_into(&mut writer, &file)?;
        writer.flush()?;
        drop(writer);

        std::fs::rename(tmp_path, path)?;
        info!("保存 {} 个向量到 {}", self.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArchiveEntry> {
        self.entries.get(index)
    }

    /// 根据 identity_key 查找条目
    pub fn find(&self, identity_key: &str) -> Option<&ArchiveEntry> {
        self.keys.get(identity_key).map(|&i| &self.entries[i])
    }

    pub fn contains_key(&self, identity_key: &str) -> bool {
        self.keys.contains_key(identity_key)
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<ArchiveEntry> {
        self.entries
    }

    /// 记录无法解码的图片，已在归档中的 identity_key 会被忽略
    pub fn with_rejected(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        let keys = keys.into_iter().filter(|key| !self.keys.contains_key(key));
        self.rejected.extend(keys);
        self
    }

    pub fn rejected(&self) -> &BTreeSet<String> {
        &self.rejected
    }

    pub fn is_rejected(&self, identity_key: &str) -> bool {
        self.rejected.contains(identity_key)
    }

    /// 归档中向量的维数，空归档返回 None
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|entry| entry.embedding.len())
    }
}

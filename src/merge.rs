use std::collections::HashMap;

use log::debug;

use crate::archive::{Archive, ArchiveEntry, Embedding};
use crate::catalog::ImageRecord;
use crate::error::Error;

/// 合并复用的条目和新编码的向量，重新分配连续编号
///
/// 复用的条目排在前面并保持原有的相对顺序，新图片按扫描顺序排在后面。
/// identity_key 重复时以后写入的为准。
pub fn merge(
    reusable: Vec<ArchiveEntry>,
    new_records: Vec<ImageRecord>,
    new_embeddings: Vec<Embedding>,
) -> Result<Archive, Error> {
    if new_records.len() != new_embeddings.len() {
        return Err(Error::EmbeddingCountMismatch {
            records: new_records.len(),
            embeddings: new_embeddings.len(),
        });
    }

    let new_entries = new_records.into_iter().zip(new_embeddings).map(|(record, embedding)| {
        ArchiveEntry {
            index: 0,
            identity_key: record.identity_key,
            path: record.path.to_string_lossy().into_owned(),
            embedding,
        }
    });

    let mut slots: Vec<Option<ArchiveEntry>> = vec![];
    let mut positions = HashMap::new();
    for entry in reusable.into_iter().chain(new_entries) {
        if let Some(old) = positions.insert(entry.identity_key.clone(), slots.len()) {
            debug!("重复的 identity_key: {}", entry.identity_key);
            slots[old] = None;
        }
        slots.push(Some(entry));
    }

    let entries = slots
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(index, entry)| ArchiveEntry { index, ..entry })
        .collect::<Vec<_>>();

    Archive::from_entries(entries)
}

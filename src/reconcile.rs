use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use log::{debug, warn};

use crate::archive::{Archive, ArchiveEntry};
use crate::catalog::{ImageRecord, Verifier};

/// 对比扫描结果与旧归档的结果
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// 可以复用的旧条目，保留旧编号和原有顺序
    pub reusable: Vec<ArchiveEntry>,
    /// 需要重新编码的图片，按扫描顺序排列
    pub new_records: Vec<ImageRecord>,
    /// 无法解码而被排除的图片的 identity_key
    pub rejected: Vec<String>,
}

/// 将扫描得到的图片划分为可复用和需要编码两部分
///
/// 归档中 identity_key 不在扫描结果中的条目（文件被删除、改名或修改）会被丢弃。
/// 复用的条目会更新为当前扫描到的路径。
/// 归档中记录为无法解码的 identity_key 不会再次检查。
pub fn reconcile(catalog: &[ImageRecord], archive: Archive, verifier: &dyn Verifier) -> Reconciliation {
    let current = catalog
        .iter()
        .map(|record| (record.identity_key.as_str(), record))
        .rev()
        .collect::<HashMap<_, _>>();

    let known_rejected = archive.rejected().clone();
    let total = archive.len();
    let reusable = archive
        .into_entries()
        .into_iter()
        .filter_map(|mut entry| {
            let record = current.get(entry.identity_key.as_str())?;
            let path = record.path.to_string_lossy();
            if entry.path != path {
                debug!("图片路径变化: {} -> {}", entry.path, path);
                entry.path = path.into_owned();
            }
            Some(entry)
        })
        .collect::<Vec<_>>();
    debug!("归档中 {} 个条目可复用，丢弃 {} 个", reusable.len(), total - reusable.len());

    // identity_key => 占用该 key 的图片路径，只记录能够使用的图片
    let mut taken = reusable
        .iter()
        .map(|entry| (entry.identity_key.clone(), PathBuf::from(&entry.path)))
        .collect::<HashMap<_, _>>();
    let mut skipped = HashSet::new();
    let mut rejected = vec![];
    let mut new_records = vec![];
    for record in catalog {
        if let Some(kept) = taken.get(&record.identity_key) {
            warn!(
                "identity_key {} 重复，跳过 {}，已使用 {}",
                record.identity_key,
                record.path.display(),
                kept.display()
            );
            continue;
        }
        if known_rejected.contains(&record.identity_key) && skipped.insert(record.identity_key.clone()) {
            debug!("图片此前无法解码，跳过: {}", record.path.display());
            rejected.push(record.identity_key.clone());
            continue;
        }
        match verifier.verify(&record.path) {
            Ok(()) => {
                taken.insert(record.identity_key.clone(), record.path.clone());
                new_records.push(record.clone());
            }
            Err(e) => {
                warn!("跳过图片: {e}");
                rejected.push(record.identity_key.clone());
            }
        }
    }

    Reconciliation { reusable, new_records, rejected }
}

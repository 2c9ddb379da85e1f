use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use log::{debug, warn};

use crate::error::Error;

/// 根目录上的进程间咨询锁
///
/// 建立索引时持有排他锁，查询时持有共享锁，锁随 RootLock 一起释放
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// 获取排他锁，已被其他进程锁定时立即返回 [`Error::Locked`]
    pub fn exclusive(path: impl AsRef<Path>) -> Result<Self> {
        Self::acquire(path.as_ref(), true)
    }

    /// 获取共享锁
    pub fn shared(path: impl AsRef<Path>) -> Result<Self> {
        Self::acquire(path.as_ref(), false)
    }

    fn acquire(path: &Path, exclusive: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("无法创建锁文件: {}", path.display()))?;

        let r = if exclusive {
            FileExt::try_lock_exclusive(&file)
        } else {
            FileExt::try_lock_shared(&file)
        };
        match r {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                return Err(Error::Locked(path.to_path_buf()).into());
            }
            Err(e) => return Err(e).with_context(|| format!("无法锁定: {}", path.display())),
        }

        debug!("获取{}锁: {}", if exclusive { "排他" } else { "共享" }, path.display());
        Ok(Self { file, path: path.to_path_buf() })
    }
}

/// 锁被其他进程持有时 fs2 返回的错误，各平台的错误码不同
fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error().is_some() && e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("释放锁失败: {}: {e}", self.path.display());
        }
    }
}

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use image::{DynamicImage, ImageError, ImageReader};
use log::warn;
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

/// 扫描得到的一张图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// 图片的绝对路径
    pub path: PathBuf,
    /// 文件名 + 修改时间，用于判断图片是否发生变化
    pub identity_key: String,
}

/// 计算文件的 identity_key，格式为 `{文件名}_{修改时间秒数}`
///
/// 修改时间取整数秒，向零截断
pub fn identity_key(path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();
    let modified = path.metadata()?.modified()?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    Ok(format!("{stem}_{secs}"))
}

/// 根据逗号分隔的后缀列表构造匹配用的正则表达式
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$"))
}

/// 递归扫描目录中的图片
///
/// 返回惰性迭代器，顺序为文件系统遍历顺序，不保证跨平台稳定
pub fn scan(root: &Path, re_suf: Regex) -> impl Iterator<Item = ImageRecord> {
    WalkDir::new(root).into_iter().filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("扫描目录出错: {e}");
                return None;
            }
        };
        // 指向文件的符号链接也算作图片
        if !entry.path().is_file() {
            return None;
        }
        let ext = entry.path().extension()?;
        if !re_suf.is_match(&ext.to_string_lossy()) {
            return None;
        }
        match identity_key(entry.path()) {
            Ok(identity_key) => Some(ImageRecord { path: entry.into_path(), identity_key }),
            Err(e) => {
                warn!("无法读取文件信息: {}: {e}", entry.path().display());
                None
            }
        }
    })
}

/// 图片解码失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// 文件读取失败
    Io,
    /// 不支持的图片格式
    Unsupported,
    /// 图片数据损坏
    Decoding,
    /// 超出解码器的尺寸或内存限制
    Limits,
    Other,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Io => "io",
            Self::Unsupported => "unsupported",
            Self::Decoding => "decoding",
            Self::Limits => "limits",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl From<&ImageError> for FailureCategory {
    fn from(e: &ImageError) -> Self {
        match e {
            ImageError::IoError(_) => Self::Io,
            ImageError::Unsupported(_) => Self::Unsupported,
            ImageError::Decoding(_) => Self::Decoding,
            ImageError::Limits(_) => Self::Limits,
            _ => Self::Other,
        }
    }
}

/// 图片无法解码
#[derive(Debug, Error)]
#[error("无法解码图片 {} [{category}]: {source}", path.display())]
pub struct VerifyError {
    pub path: PathBuf,
    pub category: FailureCategory,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl VerifyError {
    pub fn new(
        path: impl Into<PathBuf>,
        category: FailureCategory,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self { path: path.into(), category, source: source.into() }
    }

    fn from_image_error(path: &Path, e: ImageError) -> Self {
        let category = FailureCategory::from(&e);
        Self::new(path, category, e)
    }
}

/// 完整解码一张图片
pub fn decode(path: impl AsRef<Path>) -> Result<DynamicImage, VerifyError> {
    let path = path.as_ref();
    let reader = ImageReader::open(path)
        .map_err(|e| VerifyError::from_image_error(path, ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| VerifyError::from_image_error(path, ImageError::IoError(e)))?;
    reader.decode().map_err(|e| VerifyError::from_image_error(path, e))
}

/// 检查图片能否被正常解码
pub trait Verifier {
    fn verify(&self, path: &Path) -> Result<(), VerifyError>;
}

/// 使用 image 库完整解码图片进行检查
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageVerifier;

impl Verifier for ImageVerifier {
    fn verify(&self, path: &Path) -> Result<(), VerifyError> {
        decode(path).map(|_| ())
    }
}

impl<F> Verifier for F
where
    F: Fn(&Path) -> Result<(), VerifyError>,
{
    fn verify(&self, path: &Path) -> Result<(), VerifyError> {
        self(path)
    }
}

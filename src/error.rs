use std::path::PathBuf;

use thiserror::Error;

/// 调用方需要区分处理的错误
///
/// 其余错误统一通过 [`anyhow::Error`] 传递
#[derive(Debug, Error)]
pub enum Error {
    /// 既没有文本查询也没有图片查询
    #[error("未提供查询，至少需要文本或图片中的一种")]
    NoQuery,
    /// 文本查询为空字符串
    #[error("文本查询不能为空")]
    EmptyQuery,
    /// 编码器不支持该类型的查询
    #[error("当前编码器不支持{0}查询")]
    UnsupportedQuery(&'static str),
    /// 向量维度与索引不一致
    #[error("向量维度不匹配（{context}）：期望 {expected}，实际 {found}")]
    DimensionMismatch { context: String, expected: usize, found: usize },
    /// 归档编号不连续，说明合并过程出现了 bug
    #[error("归档编号不连续：第 {expected} 个条目的编号为 {found}")]
    IndexGap { expected: usize, found: usize },
    /// 新图片与新向量数量不一致
    #[error("新图片数量 ({records}) 与嵌入向量数量 ({embeddings}) 不一致")]
    EmbeddingCountMismatch { records: usize, embeddings: usize },
    /// 目录已被其他进程锁定
    #[error("目录正被另一个进程使用: {}", .0.display())]
    Locked(PathBuf),
    /// 归档文件版本不兼容
    #[error("不支持的归档版本 {found}，当前版本为 {expected}")]
    ArchiveVersion { expected: u32, found: u32 },
}

impl Error {
    /// 是否为用户输入错误，而不是系统故障
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::NoQuery | Self::EmptyQuery | Self::UnsupportedQuery(_))
    }
}

use std::path::PathBuf;

/// coversearch 核心库的错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 图片无法解码或无法转换为 RGB
    #[error("无效的图片: {0}")]
    InvalidImage(String),
    /// 图片无法读取，例如文件不存在
    #[error("无法读取图片 {path}: {reason}")]
    ImageUnavailable { path: PathBuf, reason: String },
    /// 参数不满足前置条件
    #[error("无效的参数: {0}")]
    InvalidInput(String),
    /// 元数据引用了不存在的向量，或者两者数量不一致
    #[error("元数据与索引不一致: {0}")]
    DanglingReference(String),
    /// 索引文件读写失败或格式错误
    #[error("索引文件错误: {0}")]
    IndexPersistence(String),
    /// 元数据文件读写失败或格式错误
    #[error("元数据文件错误: {0}")]
    MetadataPersistence(String),
    /// 记录已存在
    #[error("重复的记录: {0}")]
    DuplicateRecord(String),
    /// 位置已被分配
    #[error("位置 {position} 冲突: {reason}")]
    PositionConflict { position: usize, reason: String },
    /// 另一个进程正在写入同一个配置目录
    #[error("数据目录正被其他进程使用: {}", .0.display())]
    StoreLocked(PathBuf),
    /// 模型加载或推理失败
    #[error("模型错误: {0}")]
    Model(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 是否为单张图片的错误，入库时这类错误只跳过当前图片
    pub fn is_per_image(&self) -> bool {
        matches!(self, Self::InvalidImage(_) | Self::ImageUnavailable { .. })
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Self::Model(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

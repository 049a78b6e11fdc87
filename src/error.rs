//! 错误类型定义

use thiserror::Error;

/// ILB 编辑器错误类型
///
/// 所有错误对当前的 open/make 调用都是终止性的，编解码层不做局部恢复。
#[derive(Error, Debug)]
pub enum IlbError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图片编码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("PNG 编码错误: {0}")]
    PngEncoding(#[from] png::EncodingError),

    #[error("无效的文件标识: 0x{0:08X}")]
    BadMagic(u32),

    #[error("不支持的版本: {0}")]
    UnsupportedVersion(f32),

    #[error("头部长度错误: 期望 {expected}, 实际 {found}")]
    BadHeaderLength { expected: u32, found: u32 },

    #[error("调色板数量错误: {0}")]
    BadPaletteCount(u32),

    #[error("调色板类型错误: 0x{0:08X}")]
    BadPaletteType(u32),

    #[error("未知的头部标签: 0x{0:X}")]
    UnknownHeaderTag(u32),

    #[error("不支持的图像类型: 0x{0:X}")]
    UnsupportedImageType(u32),

    #[error("不支持的子类型: 0x{0:X}")]
    UnsupportedSubType(u8),

    #[error("无效的绘制模式: 0x{0:X}")]
    InvalidDrawMode(u32),

    #[error("无效的像素格式标记: 0x{0:08X}")]
    InvalidPixelFormat(u32),

    #[error("调色板索引超出范围: {index} (共 {count} 个)")]
    InvalidPaletteIndex { index: i32, count: usize },

    #[error("无效的数据大小: {0}")]
    InvalidDataSize(i32),

    #[error("记录结束标记错误: 0x{0:08X}")]
    BadSentinel(u32),

    #[error("包围盒超出图像范围")]
    BadBoundingBox,

    #[error("像素数据损坏: {0}")]
    CorruptPixelData(String),

    #[error("像素格式不匹配: 期望 {expected}, 实际 {found}")]
    PixelFormatMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("无效的缩放参数: {0}")]
    InvalidScaling(String),

    #[error("暂不支持: {0}")]
    NotSupported(&'static str),

    #[error("索引超出范围: {0}")]
    IndexOutOfBounds(usize),

    #[error("图像库为空")]
    EmptyLibrary,
}

pub type Result<T> = std::result::Result<T, IlbError>;

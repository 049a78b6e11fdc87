//! ILB Editor - 奇迹时代 (Age of Wonders) ILB 精灵容器读写库
//!
//! 支持的文件格式：
//! - 第一代 V3 (只读) / V4 (读写)
//! - 第二代标签格式 (只读)

pub mod config;
pub mod error;
pub mod formats;
pub mod image;

pub use config::{NormalizeOptions, RecordTemplate};
pub use error::{IlbError, Result};
pub use formats::{
    ContainerVariant, Generation, IlbLibrary, ImageRecord, ImageTable, make, open, open_with,
};

/// 应用程序名称
pub const APP_NAME: &str = "ILB Editor";

/// 应用程序版本（从 Cargo.toml 读取）
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

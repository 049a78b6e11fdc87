//! ILB 容器格式
//!
//! - 第一代 V3 / V4 (`gen1`)：可读，V4 可写
//! - 第二代标签格式 (`gen2`)：只读
//!
//! 文件本身不足以区分第一代和第二代（第二代没有标识），打开第二代文件需要显式指定。

pub mod gen1;
pub mod gen2;
pub mod record;
pub mod table;

pub use record::ImageRecord;
pub use table::{ImageTable, RecordId};

use crate::config::RecordTemplate;
use crate::error::{IlbError, Result};
use crate::image::bitmap::{PixelBuffer, write_indexed_png};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info};

/// 容器变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerVariant {
    Gen1V3,
    Gen1V4,
    Gen2Tagged,
}

impl ContainerVariant {
    pub fn name(&self) -> &str {
        match self {
            ContainerVariant::Gen1V3 => "ILB V3",
            ContainerVariant::Gen1V4 => "ILB V4",
            ContainerVariant::Gen2Tagged => "ILB 第二代",
        }
    }

    pub fn is_writable(&self) -> bool {
        *self == ContainerVariant::Gen1V4
    }
}

/// 文件所属的游戏代
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generation {
    #[default]
    First,
    Second,
}

/// 从数据流读取图像表
pub fn read_table<R: Read + Seek>(
    reader: &mut R,
    generation: Generation,
    template: &RecordTemplate,
) -> Result<ImageTable> {
    match generation {
        Generation::First => {
            let magic = reader.read_u32::<LittleEndian>()?;
            if magic != gen1::ILB_IDENTIFIER {
                return Err(IlbError::BadMagic(magic));
            }
            gen1::read_library(reader, template)
        }
        Generation::Second => gen2::read_library(reader, template),
    }
}

/// 将图像表写入数据流，只支持 V4
pub fn write_table<W: Write>(writer: &mut W, table: &mut ImageTable) -> Result<()> {
    match table.variant {
        ContainerVariant::Gen1V4 => gen1::write_library(writer, table),
        ContainerVariant::Gen1V3 => Err(IlbError::NotSupported("V3 文件写入")),
        ContainerVariant::Gen2Tagged => Err(IlbError::NotSupported("第二代文件写入")),
    }
}

/// 以默认模板打开第一代文件
pub fn open(path: &Path) -> Result<ImageTable> {
    open_with(path, Generation::First, &RecordTemplate::default())
}

pub fn open_with(path: &Path, generation: Generation, template: &RecordTemplate) -> Result<ImageTable> {
    debug!("打开文件: {:?}", path);
    let mut reader = BufReader::new(File::open(path)?);
    read_table(&mut reader, generation, template)
}

/// 生成文件，返回写入的字节数
///
/// 先在内存中完成编码，编码失败时不会创建或截断目标文件。
pub fn make(path: &Path, table: &mut ImageTable) -> Result<u64> {
    let mut data = Vec::new();
    write_table(&mut data, table)?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&data)?;
    writer.flush()?;
    info!("已写入 {:?}: {} 字节", path, data.len());
    Ok(data.len() as u64)
}

/// 打开的图像库
#[derive(Debug, Clone)]
pub struct IlbLibrary {
    /// 文件名
    pub file_name: String,
    pub table: ImageTable,
}

impl IlbLibrary {
    pub fn load(path: &Path, generation: Generation, template: &RecordTemplate) -> Result<Self> {
        let table = open_with(path, generation, template)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Ok(Self { file_name, table })
    }

    /// 表中的位置数（包括空位）
    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn save(&mut self, path: &Path) -> Result<u64> {
        make(path, &mut self.table)
    }

    /// 导出图像为 PNG
    ///
    /// 8 位图像导出为带调色板的 PNG，其他导出为 RGBA。精灵类型的背景色输出为透明。
    pub fn export_png(&self, index: usize, path: &Path) -> Result<()> {
        debug!("导出图像为 PNG: index={}, path={:?}", index, path);
        let record = self.table.get(index).ok_or(IlbError::IndexOutOfBounds(index))?;
        let pixels = record.pixels.as_ref().ok_or_else(|| {
            IlbError::CorruptPixelData(format!("图像 {} 没有像素数据", record.image_number))
        })?;
        let sprite = !record.image_type.is_plain();

        match pixels {
            PixelBuffer::Indexed8(plane) => {
                let palette = record
                    .palette(&self.table.palettes)?
                    .cloned()
                    .unwrap_or_default();
                let transparent = sprite.then_some(record.stored_background as u8);
                let writer = BufWriter::new(File::create(path)?);
                write_indexed_png(writer, plane, &palette, transparent)?;
            }
            _ => {
                let transparent = sprite.then_some(record.background_color);
                pixels.to_rgba(None, transparent).save(path)?;
            }
        }
        debug!("导出成功");
        Ok(())
    }
}

//! 调色板定义和管理
//!
//! ILB 调色板固定为 256 项，磁盘格式为类型标记 `0x88801B18` 之后跟 256 组 (r, g, b, pad)。

use crate::error::{IlbError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// 调色板类型标记
pub const PALETTE_TYPE_RGB: u32 = 0x8880_1B18;
/// 调色板项数
pub const PALETTE_SIZE: usize = 256;

/// RGB 颜色结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// 从 0x00RRGGBB 创建颜色
    pub fn from_rgb888(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: (value & 0xFF) as u8,
        }
    }

    /// 转换为 0x00RRGGBB
    pub fn to_rgb888(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// 格式化为十六进制颜色字符串 (如 "#FF0000")
    pub fn to_hex_string(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// 256 色调色板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: [Color; PALETTE_SIZE],
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    /// 创建全黑调色板
    pub fn new() -> Self {
        Self {
            entries: [Color::default(); PALETTE_SIZE],
        }
    }

    /// 灰度调色板，没有可用调色板时用于预览
    pub fn grayscale() -> Self {
        let mut palette = Self::new();
        for (i, entry) in palette.entries.iter_mut().enumerate() {
            *entry = Color::new(i as u8, i as u8, i as u8);
        }
        palette
    }

    pub fn entries(&self) -> &[Color; PALETTE_SIZE] {
        &self.entries
    }

    pub fn get(&self, index: u8) -> Color {
        self.entries[index as usize]
    }

    pub fn set(&mut self, index: u8, color: Color) {
        self.entries[index as usize] = color;
    }

    /// 索引对应的 RGB888 颜色
    pub fn rgb888(&self, index: u8) -> u32 {
        self.get(index).to_rgb888()
    }

    /// 读取调色板（包含类型标记）
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let palette_type = reader.read_u32::<LittleEndian>()?;
        if palette_type != PALETTE_TYPE_RGB {
            return Err(IlbError::BadPaletteType(palette_type));
        }

        let mut palette = Self::new();
        let mut quad = [0u8; 4];
        for entry in palette.entries.iter_mut() {
            reader.read_exact(&mut quad)?;
            *entry = Color::new(quad[0], quad[1], quad[2]);
        }
        Ok(palette)
    }

    /// 写入调色板（包含类型标记）
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(PALETTE_TYPE_RGB)?;
        for entry in &self.entries {
            writer.write_all(&[entry.r, entry.g, entry.b, 0])?;
        }
        Ok(())
    }

    /// PNG PLTE 块格式 (r, g, b 连续排列)
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.entries
            .iter()
            .flat_map(|entry| [entry.r, entry.g, entry.b])
            .collect()
    }
}

/// 调色板表，按记录中的调色板索引访问
pub type PaletteTable = Vec<Palette>;

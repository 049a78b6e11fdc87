//! 图像处理模块
//!
//! 包含像素缓冲区、调色板、包围盒计算、各类像素编解码以及写入前的缩放/归一化流程。

pub mod bbox;
pub mod bitmap;
pub mod compression;
pub mod palette;
pub mod plain;
pub mod resize;

pub use bbox::{BoundingBox, BoundingBoxCalculator};
pub use bitmap::{PixelBuffer, PixelDepth, Plane, Sample};
pub use palette::{Color, Palette, PaletteTable};

/// RGB888 转 RGB565 (5/6/5 截断，无抖动)
pub fn to_rgb565(rgb888: u32) -> u16 {
    let red = ((rgb888 & 0x00FF_0000) >> 19) << 11;
    let green = ((rgb888 & 0x0000_FF00) >> 10) << 5;
    let blue = (rgb888 & 0x0000_00FF) >> 3;
    (red | green | blue) as u16
}

/// RGB565 转 RGB888 (左移扩展，低位补零)
pub fn to_rgb888(rgb565: u16) -> u32 {
    let color = rgb565 as u32;
    ((color & 0xF800) << 8) | ((color & 0x07E0) << 5) | ((color & 0x001F) << 3)
}

/// 计算行字节数（DIB 的 4 字节对齐规则）
pub fn width_bytes(bit_count: u32, width: u32) -> u64 {
    (width as u64 * bit_count as u64).div_ceil(32) * 4
}

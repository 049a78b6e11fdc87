//! 位图和像素缓冲区
//!
//! 像素以行优先方式存储，每行按 DIB 规则对齐到 4 字节，行间补齐部分不属于可见区域。

use crate::error::{IlbError, Result};
use crate::image::bbox::{BoundingBox, BoundingBoxCalculator};
use crate::image::palette::Palette;
use crate::image::{to_rgb888, width_bytes};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use image::{Rgba, RgbaImage};
use std::fmt::Debug;
use std::io::{self, Read, Write};

/// 像素采样类型 (u8 索引 / u16 RGB565 / u32 ARGB)
pub trait Sample: Copy + PartialEq + Default + Debug {
    /// 每个像素的位数
    const BITS: u32;

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self>;

    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()>;
}

impl Sample for u8 {
    const BITS: u32 = 8;

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u8()
    }

    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self)
    }
}

impl Sample for u16 {
    const BITS: u32 = 16;

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u16::<LittleEndian>()
    }

    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self)
    }
}

impl Sample for u32 {
    const BITS: u32 = 32;

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u32::<LittleEndian>()
    }

    fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self)
    }
}

/// 单一像素格式的二维平面
#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T> {
    width: u32,
    height: u32,
    /// 每行的像素个数（含对齐补齐）
    stride: usize,
    data: Vec<T>,
}

/// 单个平面最多容纳的像素数（含行对齐补齐）
pub const MAX_PLANE_SAMPLES: u64 = 1 << 26;

impl<T: Sample> Plane<T> {
    /// 创建以 `fill` 填充的平面
    ///
    /// 尺寸来自文件时使用 [`Plane::try_new`]。
    pub fn new(width: u32, height: u32, fill: T) -> Self {
        let stride = (width_bytes(T::BITS, width) * 8 / T::BITS as u64) as usize;
        Self {
            width,
            height,
            stride,
            data: vec![fill; stride * height as usize],
        }
    }

    /// 创建平面，尺寸超过 [`MAX_PLANE_SAMPLES`] 时失败而不分配内存
    pub fn try_new(width: u32, height: u32, fill: T) -> Result<Self> {
        let stride = width_bytes(T::BITS, width) * 8 / T::BITS as u64;
        match stride.checked_mul(height as u64) {
            Some(samples) if samples <= MAX_PLANE_SAMPLES => Ok(Self::new(width, height, fill)),
            _ => Err(IlbError::CorruptPixelData(format!(
                "图像尺寸过大: {}x{}",
                width, height
            ))),
        }
    }

    /// 从紧密排列的像素创建平面
    pub fn from_pixels(width: u32, height: u32, pixels: &[T]) -> Result<Self> {
        if pixels.len() != width as usize * height as usize {
            return Err(IlbError::CorruptPixelData(format!(
                "像素数量 {} 与尺寸 {}x{} 不符",
                pixels.len(),
                width,
                height
            )));
        }

        let mut plane = Self::new(width, height, T::default());
        if width > 0 {
            for (y, row) in pixels.chunks(width as usize).enumerate() {
                plane.row_mut(y as u32).copy_from_slice(row);
            }
        }
        Ok(plane)
    }

    /// 由坐标函数生成平面
    pub fn from_fn(width: u32, height: u32, fill: T, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut plane = Self::new(width, height, fill);
        for y in 0..height {
            for x in 0..width {
                plane.set(x, y, f(x, y));
            }
        }
        plane
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let index = self.index(x, y);
        self.data[index] = value;
    }

    /// 左上角像素，空平面返回默认值
    pub fn first(&self) -> T {
        if self.is_empty() {
            T::default()
        } else {
            self.data[0]
        }
    }

    /// 可见行
    pub fn row(&self, y: u32) -> &[T] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [T] {
        let start = y as usize * self.stride;
        let width = self.width as usize;
        &mut self.data[start..start + width]
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// 可见区域的像素（行优先，不含对齐补齐）
    pub fn pixels(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.height).flat_map(move |y| self.row(y).iter().copied())
    }

    /// 计算相对于背景值的包围盒
    pub fn bounding_box(&self, back: T) -> BoundingBox {
        BoundingBoxCalculator::new().calc(
            &self.data,
            back,
            self.stride,
            self.width as usize,
            self.height as usize,
        )
    }
}

/// 像素深度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    Indexed8,
    Rgb565,
    Argb32,
}

impl PixelDepth {
    pub fn name(self) -> &'static str {
        match self {
            PixelDepth::Indexed8 => "8 位索引",
            PixelDepth::Rgb565 => "16 位 RGB565",
            PixelDepth::Argb32 => "32 位 ARGB",
        }
    }
}

/// 解码后的像素缓冲区
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Indexed8(Plane<u8>),
    Rgb565(Plane<u16>),
    Argb32(Plane<u32>),
}

impl PixelBuffer {
    pub fn depth(&self) -> PixelDepth {
        match self {
            PixelBuffer::Indexed8(_) => PixelDepth::Indexed8,
            PixelBuffer::Rgb565(_) => PixelDepth::Rgb565,
            PixelBuffer::Argb32(_) => PixelDepth::Argb32,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Indexed8(plane) => plane.width(),
            PixelBuffer::Rgb565(plane) => plane.width(),
            PixelBuffer::Argb32(plane) => plane.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Indexed8(plane) => plane.height(),
            PixelBuffer::Rgb565(plane) => plane.height(),
            PixelBuffer::Argb32(plane) => plane.height(),
        }
    }

    /// 左上角像素的原始值
    pub fn first_pixel(&self) -> u32 {
        match self {
            PixelBuffer::Indexed8(plane) => plane.first() as u32,
            PixelBuffer::Rgb565(plane) => plane.first() as u32,
            PixelBuffer::Argb32(plane) => plane.first(),
        }
    }

    /// 像素的 RGB888 颜色
    pub fn rgb888_at(&self, x: u32, y: u32, palette: &Palette) -> u32 {
        match self {
            PixelBuffer::Indexed8(plane) => palette.rgb888(plane.get(x, y)),
            PixelBuffer::Rgb565(plane) => to_rgb888(plane.get(x, y)),
            PixelBuffer::Argb32(plane) => plane.get(x, y) & 0x00FF_FFFF,
        }
    }

    /// 转换为 RGBA 图像
    ///
    /// 8 位缓冲区需要调色板，缺省时按灰度显示。`transparent` 为 RGB888 颜色键，
    /// 与之相同的像素输出为全透明。ARGB 缓冲区保留自身的 alpha。
    pub fn to_rgba(&self, palette: Option<&Palette>, transparent: Option<u32>) -> RgbaImage {
        let grayscale;
        let palette = match palette {
            Some(palette) => palette,
            None => {
                grayscale = Palette::grayscale();
                &grayscale
            }
        };

        RgbaImage::from_fn(self.width(), self.height(), |x, y| {
            let rgb = self.rgb888_at(x, y, palette);
            let alpha = match self {
                PixelBuffer::Argb32(plane) => (plane.get(x, y) >> 24) as u8,
                _ => 255,
            };
            let alpha = if transparent == Some(rgb) { 0 } else { alpha };
            Rgba([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, alpha])
        })
    }
}

/// 将 8 位索引平面写为带调色板的 PNG
pub fn write_indexed_png<W: Write>(
    writer: W,
    plane: &Plane<u8>,
    palette: &Palette,
    transparent_index: Option<u8>,
) -> Result<()> {
    let mut encoder = png::Encoder::new(writer, plane.width(), plane.height());
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(palette.to_rgb_bytes());
    if let Some(index) = transparent_index {
        let mut trns = vec![255u8; index as usize + 1];
        trns[index as usize] = 0;
        encoder.set_trns(trns);
    }

    let data: Vec<u8> = plane.pixels().collect();
    let mut png_writer = encoder.write_header()?;
    png_writer.write_image_data(&data)?;
    png_writer.finish()?;
    Ok(())
}

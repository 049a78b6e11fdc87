//! 写入前的归一化流程
//!
//! 16 位路径: 光栅化为 RGBA -> 可选的半透明合并 -> 背景置透明 -> 缩放 -> 合并到写入背景色 -> RGB565。
//! 8 位路径保持索引，只做最近邻缩放，补齐区域用背景索引填充。

use crate::config::{NormalizeOptions, ScalingType};
use crate::error::{IlbError, Result};
use crate::image::bitmap::{PixelBuffer, Plane};
use crate::image::palette::Palette;
use crate::image::to_rgb565;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use tracing::debug;

/// 按比例缩放的尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledSize {
    /// 缩放前补齐后的尺寸
    pub padded: (u32, u32),
    /// 缩放后的尺寸
    pub target: (u32, u32),
}

/// 计算按比例缩放的尺寸
///
/// 比例四舍五入到 0.1，记为 r/10。宽高分别补齐到 `n * r` 能被 10 整除，结果为 `n * r / 10`。
pub fn apply_scale_factor(width: u32, height: u32, factor: f32) -> Result<ScaledSize> {
    let ratio = (factor * 10.0).round();
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(IlbError::InvalidScaling(format!("缩放比例无效: {}", factor)));
    }
    let ratio = ratio as u64;

    let scale = |length: u32| {
        let mut padded = length as u64;
        while padded * ratio % 10 != 0 {
            padded += 1;
        }
        (padded as u32, (padded * ratio / 10) as u32)
    };
    let (padded_width, target_width) = scale(width);
    let (padded_height, target_height) = scale(height);

    Ok(ScaledSize {
        padded: (padded_width, padded_height),
        target: (target_width, target_height),
    })
}

fn rgba(rgb888: u32, alpha: u8) -> Rgba<u8> {
    Rgba([(rgb888 >> 16) as u8, (rgb888 >> 8) as u8, rgb888 as u8, alpha])
}

fn rgb888(pixel: &Rgba<u8>) -> u32 {
    let [r, g, b, _] = pixel.0;
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// 把背景色像素设为全透明
pub fn make_transparent(image: &mut RgbaImage, background: u32) {
    for pixel in image.pixels_mut() {
        if rgb888(pixel) == background & 0x00FF_FFFF {
            pixel.0[3] = 0;
        }
    }
}

/// 合并透明度
///
/// 与背景色相同的像素和 alpha 低于阈值的像素都变为不透明的背景色，其余像素变为不透明。
/// 返回第一个背景像素的坐标作为颜色键。
pub fn drop_transparency(image: &mut RgbaImage, threshold: u8, background: u32) -> Option<(u32, u32)> {
    let background = background & 0x00FF_FFFF;
    let mut color_key = None;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if rgb888(pixel) == background {
            pixel.0[3] = 255;
            color_key.get_or_insert((x, y));
        } else if pixel.0[3] >= threshold {
            pixel.0[3] = 255;
        } else {
            *pixel = rgba(background, 255);
            color_key.get_or_insert((x, y));
        }
    }
    color_key
}

/// 光栅化为 RGBA，透明像素保留背景色
fn rasterize(source: &PixelBuffer, palette: Option<&Palette>, background: u32) -> RgbaImage {
    let grayscale;
    let palette = match palette {
        Some(palette) => palette,
        None => {
            grayscale = Palette::grayscale();
            &grayscale
        }
    };
    let fill = rgba(background, 255);

    RgbaImage::from_fn(source.width(), source.height(), |x, y| match source {
        PixelBuffer::Argb32(plane) => {
            let value = plane.get(x, y);
            let alpha = (value >> 24) as u8;
            if alpha == 0 { fill } else { rgba(value, alpha) }
        }
        _ => rgba(source.rgb888_at(x, y, palette), 255),
    })
}

/// 归一化结果
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub buffer: PixelBuffer,
    /// 第一个背景像素的坐标
    pub color_key: Option<(u32, u32)>,
    /// 写入背景色 (RGB888)
    pub resized_background: u32,
}

impl Normalized {
    /// 写入时使用的背景值 (像素格式的原始值)
    ///
    /// 有颜色键时取该像素；否则 16 位取写入背景色的 RGB565，8 位取左上角像素。
    pub fn background_for_write(&self) -> u32 {
        match &self.buffer {
            PixelBuffer::Indexed8(plane) => match self.color_key {
                Some((x, y)) => plane.get(x, y) as u32,
                None => plane.first() as u32,
            },
            PixelBuffer::Rgb565(plane) => match self.color_key {
                Some((x, y)) => plane.get(x, y) as u32,
                None => to_rgb565(self.resized_background) as u32,
            },
            PixelBuffer::Argb32(plane) => match self.color_key {
                Some((x, y)) => plane.get(x, y) & 0x00FF_FFFF,
                None => self.resized_background & 0x00FF_FFFF,
            },
        }
    }
}

/// 归一化器
#[derive(Debug, Clone)]
pub struct Normalizer<'a> {
    pub options: &'a NormalizeOptions,
    /// 平铺类型不做背景透明处理
    pub plain: bool,
    /// 源图像背景色 (RGB888)
    pub original_background: u32,
    /// 写入背景色 (RGB888)
    pub resized_background: u32,
}

impl Normalizer<'_> {
    fn target_size(&self, width: u32, height: u32) -> Result<Option<ScaledSize>> {
        match self.options.scaling {
            ScalingType::None => Ok(None),
            ScalingType::Fixed => {
                let (target_width, target_height) = self.options.scale_to;
                if target_width == 0 || target_height == 0 {
                    return Err(IlbError::InvalidScaling(format!(
                        "目标尺寸无效: {}x{}",
                        target_width, target_height
                    )));
                }
                Ok(Some(ScaledSize {
                    padded: (width, height),
                    target: (target_width, target_height),
                }))
            }
            ScalingType::Proportional => {
                apply_scale_factor(width, height, self.options.scaling_factor).map(Some)
            }
        }
    }

    /// 8 位索引路径
    pub fn indexed(&self, plane: &Plane<u8>, background_index: u8) -> Result<Normalized> {
        let size = self.target_size(plane.width(), plane.height())?;
        let output = match size {
            Some(size) if !plane.is_empty() => {
                let source = GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
                    Luma([plane.get(x, y)])
                });
                let (padded_width, padded_height) = size.padded;
                let mut padded = GrayImage::from_pixel(padded_width, padded_height, Luma([background_index]));
                imageops::replace(&mut padded, &source, 0, 0);
                let (target_width, target_height) = size.target;
                debug!(
                    "缩放索引图像 {}x{} -> {}x{}",
                    plane.width(),
                    plane.height(),
                    target_width,
                    target_height
                );
                let scaled = imageops::resize(&padded, target_width, target_height, FilterType::Nearest);
                Plane::from_fn(target_width, target_height, background_index, |x, y| {
                    scaled.get_pixel(x, y).0[0]
                })
            }
            _ => plane.clone(),
        };

        let color_key = (0..output.height())
            .flat_map(|y| (0..output.width()).map(move |x| (x, y)))
            .find(|&(x, y)| output.get(x, y) == background_index);

        Ok(Normalized {
            buffer: PixelBuffer::Indexed8(output),
            color_key,
            resized_background: self.resized_background,
        })
    }

    /// 16 位 RGB565 路径
    pub fn rgb565(&self, source: &PixelBuffer, palette: Option<&Palette>) -> Result<Normalized> {
        let mut canvas = rasterize(source, palette, self.original_background);

        if self.options.drop_transparent {
            drop_transparency(&mut canvas, self.options.drop_threshold, self.original_background);
        }
        if !self.plain {
            make_transparent(&mut canvas, self.original_background);
        }

        if let Some(size) = self.target_size(canvas.width(), canvas.height())? {
            if size.padded != canvas.dimensions() {
                let (padded_width, padded_height) = size.padded;
                let mut padded = RgbaImage::new(padded_width, padded_height);
                imageops::replace(&mut padded, &canvas, 0, 0);
                if !self.plain {
                    make_transparent(&mut padded, self.original_background);
                }
                canvas = padded;
            }
            let (target_width, target_height) = size.target;
            debug!(
                "缩放图像 {}x{} -> {}x{}",
                canvas.width(),
                canvas.height(),
                target_width,
                target_height
            );
            canvas = imageops::resize(
                &canvas,
                target_width,
                target_height,
                self.options.interpolation.filter(),
            );
        }

        let color_key = drop_transparency(
            &mut canvas,
            self.options.drop_threshold,
            self.resized_background,
        );
        let plane = Plane::from_fn(canvas.width(), canvas.height(), 0u16, |x, y| {
            to_rgb565(rgb888(canvas.get_pixel(x, y)))
        });

        Ok(Normalized {
            buffer: PixelBuffer::Rgb565(plane),
            color_key,
            resized_background: self.resized_background,
        })
    }
}

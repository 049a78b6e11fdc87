//! 图像记录
//!
//! 一条记录描述一幅精灵图像：元数据、包围盒、背景色以及解码后的像素。
//! 组合图像的子图像保存在 [`ImageTable`](crate::formats::table::ImageTable) 的存储区中，记录只持有它们的 id。

use crate::config::{NormalizeOptions, RecordTemplate};
use crate::error::{IlbError, Result};
use crate::formats::table::RecordId;
use crate::image::bbox::BoundingBox;
use crate::image::bitmap::{PixelBuffer, PixelDepth, Plane};
use crate::image::compression::{
    decode_masked8, decode_rle16, decode_rle8, encode_masked8, encode_rle16, encode_rle8,
};
use crate::image::palette::Palette;
use crate::image::plain::{read_alpha_mask, read_masked16, read_plain, write_plain};
use crate::image::resize::{Normalized, Normalizer};
use crate::image::to_rgb888;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

/// 16 位像素格式标记 (RGB565)
pub const PIXEL_FORMAT_RGB565: u32 = 0x5650_9310;

/// 图像类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    /// 8 位未压缩
    Plain8,
    /// 8 位行程编码
    Rle8,
    /// 8 位遮罩压缩
    Masked8,
    /// 16 位未压缩
    Plain16,
    /// 16 位行程编码
    Rle16,
    /// 16 位透明行程编码
    TransparentRle16,
    /// 16 位精灵
    Sprite16,
    /// 8 位 alpha 遮罩 (仅第二代)
    AlphaMask,
}

impl ImageType {
    /// 从第一代类型码解析
    pub fn from_gen1_code(code: u32) -> Result<Self> {
        match code {
            0x01 => Ok(ImageType::Plain8),
            0x02 => Ok(ImageType::Rle8),
            0x03 => Ok(ImageType::Masked8),
            0x10 => Ok(ImageType::Plain16),
            0x11 => Ok(ImageType::Rle16),
            0x12 => Ok(ImageType::TransparentRle16),
            0x16 => Ok(ImageType::Sprite16),
            _ => Err(IlbError::UnsupportedImageType(code)),
        }
    }

    /// 第一代类型码，alpha 遮罩没有对应的类型码
    pub fn gen1_code(self) -> Option<u32> {
        match self {
            ImageType::Plain8 => Some(0x01),
            ImageType::Rle8 => Some(0x02),
            ImageType::Masked8 => Some(0x03),
            ImageType::Plain16 => Some(0x10),
            ImageType::Rle16 => Some(0x11),
            ImageType::TransparentRle16 => Some(0x12),
            ImageType::Sprite16 => Some(0x16),
            ImageType::AlphaMask => None,
        }
    }

    /// 从第二代类型码解析，返回 (类型, 是否带遮罩)
    pub fn from_gen2_code(code: u32) -> Result<(Self, bool)> {
        match code {
            0x0030_0001 => Ok((ImageType::Plain8, false)),
            0x0030_0002 => Ok((ImageType::Rle8, false)),
            0x0030_0003 => Ok((ImageType::Masked8, false)),
            0x0030_0010 => Ok((ImageType::Plain16, false)),
            0x0030_0011 => Ok((ImageType::Rle16, false)),
            0x0030_0014 => Ok((ImageType::Sprite16, false)),
            0x0030_0015 => Ok((ImageType::Sprite16, true)),
            0x0030_0016 => Ok((ImageType::AlphaMask, false)),
            _ => Err(IlbError::UnsupportedImageType(code)),
        }
    }

    pub fn depth(self) -> PixelDepth {
        match self {
            ImageType::Plain8 | ImageType::Rle8 | ImageType::Masked8 => PixelDepth::Indexed8,
            ImageType::Plain16
            | ImageType::Rle16
            | ImageType::TransparentRle16
            | ImageType::Sprite16 => PixelDepth::Rgb565,
            ImageType::AlphaMask => PixelDepth::Argb32,
        }
    }

    pub fn is_8bpp(self) -> bool {
        self.depth() == PixelDepth::Indexed8
    }

    /// 未压缩类型：背景取左上角像素，写入时包围盒为空
    pub fn is_plain(self) -> bool {
        matches!(self, ImageType::Plain8 | ImageType::Plain16)
    }

    /// 第一代记录中是否有包围盒和背景字段
    pub fn has_bounding_box(self) -> bool {
        matches!(
            self,
            ImageType::Rle8
                | ImageType::Masked8
                | ImageType::Rle16
                | ImageType::TransparentRle16
                | ImageType::Sprite16
        )
    }

    /// 第一代记录中是否有裁剪字段
    pub fn has_clip_field(self) -> bool {
        matches!(
            self,
            ImageType::Rle8 | ImageType::Rle16 | ImageType::TransparentRle16
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageType::Plain8 => "8 位未压缩",
            ImageType::Rle8 => "8 位 RLE",
            ImageType::Masked8 => "8 位遮罩",
            ImageType::Plain16 => "16 位未压缩",
            ImageType::Rle16 => "16 位 RLE",
            ImageType::TransparentRle16 => "16 位透明 RLE",
            ImageType::Sprite16 => "16 位精灵",
            ImageType::AlphaMask => "alpha 遮罩",
        }
    }
}

/// 记录子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubType {
    Format2,
    Format3,
}

impl SubType {
    /// 子类型字节 1 和 2 都是 Format2 (1 表示数据内联)
    pub fn from_sub_id(sub_id: u8) -> Result<Self> {
        match sub_id {
            1 | 2 => Ok(SubType::Format2),
            3 => Ok(SubType::Format3),
            _ => Err(IlbError::UnsupportedSubType(sub_id)),
        }
    }

    pub fn sub_id(self) -> u8 {
        match self {
            SubType::Format2 => 2,
            SubType::Format3 => 3,
        }
    }
}

/// 加载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    Instant,
    WhenUsed,
    OnDemand,
    WhenReferenced,
}

impl LoadMode {
    /// 未知值按 WhenUsed 处理
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => LoadMode::Instant,
            2 => LoadMode::OnDemand,
            3 => LoadMode::WhenReferenced,
            _ => LoadMode::WhenUsed,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            LoadMode::Instant => 0,
            LoadMode::WhenUsed => 1,
            LoadMode::OnDemand => 2,
            LoadMode::WhenReferenced => 3,
        }
    }
}

/// 显示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShowMode {
    Opaque,
    Transparent,
    Blended,
}

impl ShowMode {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(ShowMode::Opaque),
            1 => Ok(ShowMode::Transparent),
            2 => Ok(ShowMode::Blended),
            _ => Err(IlbError::InvalidDrawMode(code)),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            ShowMode::Opaque => 0,
            ShowMode::Transparent => 1,
            ShowMode::Blended => 2,
        }
    }
}

/// 混合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    User,
    Alpha,
    Brighten,
    Intensity,
    Shadow,
    LinearAlpha,
}

impl BlendMode {
    /// 第一代绘制模式字段中的混合码
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(BlendMode::User),
            1 => Some(BlendMode::Alpha),
            2 => Some(BlendMode::Brighten),
            3 => Some(BlendMode::Intensity),
            4 => Some(BlendMode::Shadow),
            5 => Some(BlendMode::LinearAlpha),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            BlendMode::User => 0,
            BlendMode::Alpha => 1,
            BlendMode::Brighten => 2,
            BlendMode::Intensity => 3,
            BlendMode::Shadow => 4,
            BlendMode::LinearAlpha => 5,
        }
    }
}

/// 裁剪提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClipHint {
    #[default]
    None,
    AsTcMap,
    AsShieldsM,
    AsItem,
    AsMountain,
    AsStructure,
}

const CLIP_TC_MAP: u32 = 0x0046_5EEC;
const CLIP_SHIELDS_M: u32 = 0x0046_6014;
const CLIP_ITEM: u32 = 0x0046_6214;

impl ClipHint {
    /// 未知值返回 None
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ClipHint::None),
            CLIP_TC_MAP => Some(ClipHint::AsTcMap),
            CLIP_SHIELDS_M => Some(ClipHint::AsShieldsM),
            CLIP_ITEM => Some(ClipHint::AsItem),
            _ => None,
        }
    }

    /// 物品、山脉和建筑共用同一个值
    pub fn raw(self) -> u32 {
        match self {
            ClipHint::None => 0,
            ClipHint::AsTcMap => CLIP_TC_MAP,
            ClipHint::AsShieldsM => CLIP_SHIELDS_M,
            ClipHint::AsItem | ClipHint::AsMountain | ClipHint::AsStructure => CLIP_ITEM,
        }
    }
}

/// 编码结果，写记录信息时使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub bounding_box: BoundingBox,
    /// 数据在图像数据区中的偏移
    pub data_offset: u32,
    pub data_size: u32,
    /// 背景值 (像素格式的原始值)
    pub background: u32,
}

/// 图像记录
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub image_number: i32,
    pub instance_number: i32,
    pub name: String,
    /// 仅第二代文件有描述
    pub description: String,
    pub image_type: ImageType,
    pub sub_type: SubType,
    pub width: i32,
    pub height: i32,
    pub x_shift: i32,
    pub y_shift: i32,
    pub load_mode: LoadMode,
    pub show_mode: ShowMode,
    pub blend_mode: BlendMode,
    pub blend_value: i32,
    /// 8 位图像使用的调色板索引
    pub palette_index: i32,
    pub bounding_box: BoundingBox,
    /// 文件中存储的背景值 (像素格式的原始值)
    pub stored_background: u32,
    /// 解码后的背景色 (RGB888)
    pub background_color: u32,
    /// 写入背景色 (RGB888)
    pub resized_background: u32,
    pub clip_hint: ClipHint,
    pub data_size: i32,
    pub data_offset: i32,
    /// 16 位精灵是否带遮罩
    pub has_mask: bool,
    pub pixels: Option<PixelBuffer>,
    pub normalize: NormalizeOptions,
    pub sub_images: Vec<RecordId>,
}

impl ImageRecord {
    /// 以模板创建空记录
    pub fn new(template: &RecordTemplate) -> Self {
        Self {
            image_number: 0,
            instance_number: 0,
            name: String::new(),
            description: String::new(),
            image_type: template.image_type,
            sub_type: template.sub_type,
            width: 0,
            height: 0,
            x_shift: 0,
            y_shift: 0,
            load_mode: template.load_mode,
            show_mode: template.show_mode,
            blend_mode: template.blend_mode,
            blend_value: template.blend_value,
            palette_index: 0,
            bounding_box: BoundingBox::empty(),
            stored_background: 0,
            background_color: 0,
            resized_background: template.resized_background,
            clip_hint: template.clip_hint,
            data_size: 0,
            data_offset: 0,
            has_mask: false,
            pixels: None,
            normalize: template.normalize.clone(),
            sub_images: Vec::new(),
        }
    }

    /// 由像素创建记录
    ///
    /// 背景色取左上角像素。8 位像素需要设置 `palette_index` 指向调色板表中的调色板。
    pub fn from_pixels(template: &RecordTemplate, pixels: PixelBuffer, name: &str) -> Self {
        let mut record = Self::new(template);
        record.name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name)
            .to_string();
        record.width = pixels.width() as i32;
        record.height = pixels.height() as i32;
        record.stored_background = pixels.first_pixel();
        record.background_color = match &pixels {
            PixelBuffer::Indexed8(_) => 0,
            PixelBuffer::Rgb565(plane) => to_rgb888(plane.first()),
            PixelBuffer::Argb32(plane) => plane.first() & 0x00FF_FFFF,
        };
        record.pixels = Some(pixels);
        record
    }

    pub fn is_composite(&self) -> bool {
        !self.sub_images.is_empty()
    }

    /// 8 位记录使用的调色板，16 位记录返回 None
    pub fn palette<'a>(&self, palettes: &'a [Palette]) -> Result<Option<&'a Palette>> {
        if !self.image_type.is_8bpp() {
            return Ok(None);
        }
        usize::try_from(self.palette_index)
            .ok()
            .and_then(|index| palettes.get(index))
            .map(Some)
            .ok_or(IlbError::InvalidPaletteIndex {
                index: self.palette_index,
                count: palettes.len(),
            })
    }

    /// 源像素使用的调色板（源像素为 8 位时）
    fn source_palette<'a>(&self, palettes: &'a [Palette]) -> Result<Option<&'a Palette>> {
        match &self.pixels {
            Some(PixelBuffer::Indexed8(_)) => usize::try_from(self.palette_index)
                .ok()
                .and_then(|index| palettes.get(index))
                .map(Some)
                .ok_or(IlbError::InvalidPaletteIndex {
                    index: self.palette_index,
                    count: palettes.len(),
                }),
            _ => Ok(None),
        }
    }

    fn dimensions(&self) -> Result<(u32, u32)> {
        match (u32::try_from(self.width), u32::try_from(self.height)) {
            (Ok(width), Ok(height)) => Ok((width, height)),
            _ => Err(IlbError::CorruptPixelData(format!(
                "图像尺寸无效: {}x{}",
                self.width, self.height
            ))),
        }
    }

    /// 从数据流解码像素
    ///
    /// 先读取 `data_size` 字节的数据块再解码，无论编解码器实际消耗多少，数据流都停在块尾。
    pub fn decode_pixels<R: Read>(&mut self, reader: &mut R, palettes: &[Palette]) -> Result<()> {
        let (width, height) = self.dimensions()?;
        if !self.bounding_box.fits(width, height) {
            return Err(IlbError::BadBoundingBox);
        }
        let data_size = usize::try_from(self.data_size)
            .map_err(|_| IlbError::InvalidDataSize(self.data_size))?;
        // 按实际读到的字节增长，不预先分配 data_size
        let mut payload = Vec::new();
        reader.by_ref().take(data_size as u64).read_to_end(&mut payload)?;
        if payload.len() < data_size {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        let mut data = Cursor::new(payload.as_slice());
        let has_data = data_size > 0;
        let bbox = self.bounding_box;

        let buffer = match self.image_type.depth() {
            PixelDepth::Indexed8 => {
                let palette = self.palette(palettes)?.cloned().unwrap_or_default();
                let mut back = self.stored_background as u8;
                let mut plane = Plane::try_new(width, height, back)?;
                match self.image_type {
                    ImageType::Plain8 => {
                        if has_data {
                            read_plain(&mut data, &mut plane, &bbox)?;
                        }
                        back = plane.first();
                        self.stored_background = back as u32;
                    }
                    ImageType::Rle8 => {
                        if has_data {
                            decode_rle8(&mut data, &mut plane, &bbox, back)?;
                        }
                    }
                    _ => decode_masked8(&mut data, &mut plane, &bbox, back, data_size)?,
                }
                self.background_color = palette.rgb888(back);
                PixelBuffer::Indexed8(plane)
            }
            PixelDepth::Rgb565 => {
                let mut back = self.stored_background as u16;
                let mut plane = Plane::try_new(width, height, back)?;
                if has_data {
                    match self.image_type {
                        ImageType::Rle16 | ImageType::TransparentRle16 => {
                            decode_rle16(&mut data, &mut plane, &bbox, back)?
                        }
                        ImageType::Sprite16 if self.has_mask => {
                            read_masked16(&mut data, &mut plane, &bbox)?
                        }
                        _ => read_plain(&mut data, &mut plane, &bbox)?,
                    }
                }
                if self.image_type == ImageType::Plain16 {
                    back = plane.first();
                    self.stored_background = back as u32;
                }
                self.background_color = to_rgb888(back);
                PixelBuffer::Rgb565(plane)
            }
            PixelDepth::Argb32 => {
                let back = self.stored_background & 0x00FF_FFFF;
                let mut plane = Plane::try_new(width, height, back)?;
                if has_data {
                    read_alpha_mask(&mut data, &mut plane, &bbox, back)?;
                }
                self.background_color = back;
                PixelBuffer::Argb32(plane)
            }
        };

        let consumed = data.position() as usize;
        if consumed < data_size {
            debug!(
                "图像 {} 的数据块还剩 {} 字节未使用",
                self.image_number,
                data_size - consumed
            );
        }

        self.resized_background = self.background_color;
        self.pixels = Some(buffer);
        Ok(())
    }

    /// 写入前的归一化
    pub fn normalize(&self, palettes: &[Palette]) -> Result<Normalized> {
        let pixels = self.pixels.as_ref().ok_or_else(|| {
            IlbError::CorruptPixelData(format!("图像 {} 没有像素数据", self.image_number))
        })?;
        let normalizer = Normalizer {
            options: &self.normalize,
            plain: self.image_type.is_plain(),
            original_background: self.background_color,
            resized_background: self.resized_background,
        };

        match self.image_type.depth() {
            PixelDepth::Indexed8 => {
                let PixelBuffer::Indexed8(plane) = pixels else {
                    return Err(IlbError::PixelFormatMismatch {
                        expected: PixelDepth::Indexed8.name(),
                        found: pixels.depth().name(),
                    });
                };
                // 8 位图像以存储的背景索引为准
                self.palette(palettes)?;
                normalizer.indexed(plane, self.stored_background as u8)
            }
            PixelDepth::Rgb565 => normalizer.rgb565(pixels, self.source_palette(palettes)?),
            PixelDepth::Argb32 => Err(IlbError::NotSupported("alpha 遮罩图像不能写入")),
        }
    }

    /// 按记录类型编码像素，追加到图像数据区
    ///
    /// 缓冲区格式与类型不符时在写入任何字节之前失败。
    pub fn encode_pixels(&self, normalized: &Normalized, image_data: &mut Vec<u8>) -> Result<EncodedImage> {
        let expected = self.image_type.depth();
        if normalized.buffer.depth() != expected {
            return Err(IlbError::PixelFormatMismatch {
                expected: expected.name(),
                found: normalized.buffer.depth().name(),
            });
        }

        let background = normalized.background_for_write();
        let data_offset = image_data.len();
        let bounding_box = match (&normalized.buffer, self.image_type) {
            (PixelBuffer::Indexed8(plane), ImageType::Plain8) => {
                write_plain(image_data, plane, &BoundingBox::empty())?;
                BoundingBox::empty()
            }
            (PixelBuffer::Indexed8(plane), ImageType::Rle8) => {
                let bbox = plane.bounding_box(background as u8);
                encode_rle8(image_data, plane, &bbox, background as u8)?;
                bbox
            }
            (PixelBuffer::Indexed8(plane), _) => {
                let bbox = plane.bounding_box(background as u8);
                encode_masked8(image_data, plane, &bbox, background as u8)?;
                bbox
            }
            (PixelBuffer::Rgb565(plane), ImageType::Plain16) => {
                write_plain(image_data, plane, &BoundingBox::empty())?;
                BoundingBox::empty()
            }
            (PixelBuffer::Rgb565(plane), ImageType::Sprite16) => {
                if self.has_mask {
                    warn!("图像 {} 的遮罩不会写入，按未压缩精灵保存", self.image_number);
                }
                let bbox = plane.bounding_box(background as u16);
                write_plain(image_data, plane, &bbox)?;
                bbox
            }
            (PixelBuffer::Rgb565(plane), _) => {
                let bbox = plane.bounding_box(background as u16);
                encode_rle16(image_data, plane, &bbox, background as u16)?;
                bbox
            }
            (PixelBuffer::Argb32(_), _) => {
                return Err(IlbError::NotSupported("alpha 遮罩图像不能写入"));
            }
        };

        Ok(EncodedImage {
            width: normalized.buffer.width(),
            height: normalized.buffer.height(),
            bounding_box,
            data_offset: data_offset as u32,
            data_size: (image_data.len() - data_offset) as u32,
            background,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::palette::Color;
    use crate::image::to_rgb565;

    fn palette_table() -> Vec<Palette> {
        let mut palette = Palette::grayscale();
        palette.set(0, Color::new(0xFF, 0x00, 0xFF));
        vec![palette]
    }

    #[test]
    fn test_type_codes() {
        for code in [0x01, 0x02, 0x03, 0x10, 0x11, 0x12, 0x16] {
            let image_type = ImageType::from_gen1_code(code).unwrap();
            assert_eq!(image_type.gen1_code(), Some(code));
        }
        assert!(matches!(
            ImageType::from_gen1_code(0x04),
            Err(IlbError::UnsupportedImageType(0x04))
        ));
        assert_eq!(
            ImageType::from_gen2_code(0x0030_0015).unwrap(),
            (ImageType::Sprite16, true)
        );
        assert_eq!(ImageType::AlphaMask.gen1_code(), None);
        assert!(ImageType::Plain16.is_plain());
        assert!(!ImageType::Plain16.has_bounding_box());
        assert!(ImageType::Rle8.has_clip_field());
        assert!(!ImageType::Masked8.has_clip_field());
    }

    #[test]
    fn test_enum_codes() {
        assert_eq!(SubType::from_sub_id(1).unwrap(), SubType::Format2);
        assert!(matches!(SubType::from_sub_id(4), Err(IlbError::UnsupportedSubType(4))));
        assert_eq!(LoadMode::from_byte(9), LoadMode::WhenUsed);
        assert_eq!(LoadMode::from_byte(0), LoadMode::Instant);
        assert_eq!(LoadMode::WhenReferenced.to_byte(), 3);
        assert!(matches!(ShowMode::from_code(3), Err(IlbError::InvalidDrawMode(3))));
        assert_eq!(BlendMode::from_code(4), Some(BlendMode::Shadow));
        assert_eq!(ClipHint::from_raw(0x0046_6214), Some(ClipHint::AsItem));
        assert_eq!(ClipHint::AsStructure.raw(), 0x0046_6214);
        assert_eq!(ClipHint::from_raw(0x1234), None);
    }

    #[test]
    fn test_palette_index_validation() {
        let mut record = ImageRecord::new(&RecordTemplate::default());
        record.palette_index = 3;
        assert!(matches!(
            record.palette(&palette_table()),
            Err(IlbError::InvalidPaletteIndex { index: 3, count: 1 })
        ));
        record.image_type = ImageType::Rle16;
        assert!(record.palette(&palette_table()).unwrap().is_none());
    }

    #[test]
    fn test_rle8_encode_then_decode() {
        let palettes = palette_table();
        let plane = Plane::from_pixels(4, 3, &[0u8, 0, 0, 0, 0, 9, 8, 0, 0, 0, 7, 0]).unwrap();
        let record = ImageRecord::from_pixels(
            &RecordTemplate::default(),
            PixelBuffer::Indexed8(plane.clone()),
            "sprite",
        );

        let normalized = record.normalize(&palettes).unwrap();
        let mut image_data = Vec::new();
        let encoded = record.encode_pixels(&normalized, &mut image_data).unwrap();
        assert_eq!(encoded.bounding_box, BoundingBox::new(1, 1, 2, 2));
        assert_eq!(encoded.background, 0);
        assert_eq!(encoded.data_size as usize, image_data.len());

        let mut loaded = ImageRecord::new(&RecordTemplate::default());
        loaded.width = 4;
        loaded.height = 3;
        loaded.bounding_box = encoded.bounding_box;
        loaded.data_size = encoded.data_size as i32;
        loaded.decode_pixels(&mut image_data.as_slice(), &palettes).unwrap();
        assert_eq!(loaded.pixels, Some(PixelBuffer::Indexed8(plane)));
        assert_eq!(loaded.background_color, 0x00FF_00FF);
    }

    #[test]
    fn test_indexed_background_index() {
        let palettes = vec![Palette::grayscale()];
        #[rustfmt::skip]
        let pixels = [
            5, 5, 5, 5,
            5, 5, 0, 5,
        ];
        let plane = Plane::from_pixels(4, 2, &pixels).unwrap();
        let record = ImageRecord::from_pixels(
            &RecordTemplate::with_type(ImageType::Rle8),
            PixelBuffer::Indexed8(plane),
            "bg5",
        );
        assert_eq!(record.stored_background, 5);

        let normalized = record.normalize(&palettes).unwrap();
        let mut image_data = Vec::new();
        let encoded = record.encode_pixels(&normalized, &mut image_data).unwrap();
        assert_eq!(encoded.background, 5);
        assert_eq!(encoded.bounding_box, BoundingBox::new(1, 2, 2, 1));
    }

    #[test]
    fn test_oversized_plane_rejected() {
        let mut record = ImageRecord::new(&RecordTemplate::with_type(ImageType::Plain16));
        record.width = 0x2000_0000;
        record.height = 1;
        let result = record.decode_pixels(&mut &[0u8; 0][..], &[]);
        assert!(matches!(result, Err(IlbError::CorruptPixelData(_))));
        assert!(record.pixels.is_none());
    }

    #[test]
    fn test_from_pixels_trims_path() {
        let plane = Plane::from_pixels(1, 1, &[0x001Fu16]).unwrap();
        let record = ImageRecord::from_pixels(
            &RecordTemplate::with_type(ImageType::Plain16),
            PixelBuffer::Rgb565(plane),
            "units/archer.bmp",
        );
        assert_eq!(record.name, "archer.bmp");
        assert_eq!(record.background_color, 0x0000_00F8);
        assert!(record.bounding_box.is_empty());
    }

    #[test]
    fn test_plain16_background_is_first_pixel() {
        let mut record = ImageRecord::new(&RecordTemplate::with_type(ImageType::Plain16));
        record.width = 2;
        record.height = 1;
        record.data_size = 4;
        let data = [0x1F, 0x00, 0xFF, 0xFF];
        record.decode_pixels(&mut &data[..], &[]).unwrap();
        assert_eq!(record.stored_background, 0x001F);
        assert_eq!(record.background_color, 0x0000_00F8);
    }

    #[test]
    fn test_bounding_box_outside_image() {
        let mut record = ImageRecord::new(&RecordTemplate::with_type(ImageType::Rle16));
        record.width = 2;
        record.height = 2;
        record.bounding_box = BoundingBox::from_extent(3, 1, 0, 0);
        let result = record.decode_pixels(&mut &[0u8; 0][..], &[]);
        assert!(matches!(result, Err(IlbError::BadBoundingBox)));
    }

    #[test]
    fn test_encode_rejects_mismatched_depth() {
        let record = ImageRecord::new(&RecordTemplate::with_type(ImageType::Rle16));
        let normalized = Normalized {
            buffer: PixelBuffer::Indexed8(Plane::new(2, 2, 0)),
            color_key: None,
            resized_background: 0,
        };
        let mut image_data = Vec::new();
        let result = record.encode_pixels(&normalized, &mut image_data);
        assert!(matches!(result, Err(IlbError::PixelFormatMismatch { .. })));
        assert!(image_data.is_empty());
    }

    #[test]
    fn test_indexed_source_for_16bit_type() {
        let palettes = palette_table();
        let plane = Plane::from_pixels(2, 1, &[0u8, 200]).unwrap();
        let mut record = ImageRecord::from_pixels(
            &RecordTemplate::with_type(ImageType::Rle16),
            PixelBuffer::Indexed8(plane),
            "converted",
        );
        record.background_color = 0x00FF_00FF;
        record.resized_background = 0x00FF_00FF;

        let normalized = record.normalize(&palettes).unwrap();
        let PixelBuffer::Rgb565(plane) = &normalized.buffer else {
            panic!("期望 RGB565 缓冲区");
        };
        assert_eq!(plane.get(0, 0), to_rgb565(0x00FF_00FF));
        assert_eq!(plane.get(1, 0), to_rgb565(0x00C8_C8C8));
    }

    #[test]
    fn test_8bit_type_rejects_16bit_source() {
        let record = ImageRecord::from_pixels(
            &RecordTemplate::default(),
            PixelBuffer::Rgb565(Plane::new(2, 2, 0)),
            "wrong",
        );
        assert!(matches!(
            record.normalize(&palette_table()),
            Err(IlbError::PixelFormatMismatch { .. })
        ));
    }
}

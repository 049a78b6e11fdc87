//! 第一代 ILB 容器 (V3 / V4)
//!
//! 文件结构:
//! - 标识 `0x424C4904`、unknown1、版本 (f32)、头部长度
//! - V4: 图像数据偏移、文件大小
//! - 调色板数量及调色板 (V3 必须为 0)
//! - 图像记录，以 -1 结束
//! - V4: 图像数据区，按图像编号顺序排列，子图像紧跟在父图像之后

use crate::config::RecordTemplate;
use crate::error::{IlbError, Result};
use crate::formats::ContainerVariant;
use crate::formats::record::{
    BlendMode, ClipHint, EncodedImage, ImageRecord, ImageType, LoadMode, PIXEL_FORMAT_RGB565,
    ShowMode, SubType,
};
use crate::formats::table::{ImageTable, RecordId, RecordTree};
use crate::image::palette::Palette;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracing::{debug, info, warn};

/// 文件标识
pub const ILB_IDENTIFIER: u32 = 0x424C_4904;
/// 组合图像标记
pub const COMPOSITE_MARKER: u32 = 0x100;
/// 组合图像子图像列表结束 / 空白图像标记
pub const COMPOSITE_END: u32 = 0;
/// 记录结束标记
pub const RECORD_END: u32 = 0xFFFF_FFFF;

pub const HEADER_V3_LENGTH: u32 = 16;
pub const HEADER_V4_LENGTH: u32 = 24;

/// V4 头部 unknown1：有调色板 / 无调色板
const UNKNOWN1_WITH_PALETTE: u32 = 0x0040_DB00;
const UNKNOWN1_WITHOUT_PALETTE: u32 = 0x0040_F000;

/// 第一代文件头
#[derive(Debug, Clone, PartialEq)]
pub struct Gen1Header {
    pub unknown1: u32,
    pub version: f32,
    pub length: u32,
    pub image_data_offset: u32,
    pub file_size: u32,
    pub palette_count: u32,
}

impl Gen1Header {
    pub fn variant(&self) -> ContainerVariant {
        if self.length == HEADER_V3_LENGTH {
            ContainerVariant::Gen1V3
        } else {
            ContainerVariant::Gen1V4
        }
    }

    /// 读取标识之后的头部
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let unknown1 = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_f32::<LittleEndian>()?;
        let expected = if version == 3.0 {
            HEADER_V3_LENGTH
        } else if version == 4.0 {
            HEADER_V4_LENGTH
        } else {
            return Err(IlbError::UnsupportedVersion(version));
        };

        let length = reader.read_u32::<LittleEndian>()?;
        if length != expected {
            return Err(IlbError::BadHeaderLength {
                expected,
                found: length,
            });
        }

        let (image_data_offset, file_size) = if length == HEADER_V4_LENGTH {
            (
                reader.read_u32::<LittleEndian>()?,
                reader.read_u32::<LittleEndian>()?,
            )
        } else {
            (0, 0)
        };

        let palette_count = reader.read_u32::<LittleEndian>()?;
        if length == HEADER_V3_LENGTH && palette_count != 0 {
            return Err(IlbError::BadPaletteCount(palette_count));
        }

        Ok(Self {
            unknown1,
            version,
            length,
            image_data_offset,
            file_size,
            palette_count,
        })
    }

    /// 写入 V4 头部（包含标识）
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(ILB_IDENTIFIER)?;
        writer.write_u32::<LittleEndian>(self.unknown1)?;
        writer.write_f32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.length)?;
        writer.write_u32::<LittleEndian>(self.image_data_offset)?;
        writer.write_u32::<LittleEndian>(self.file_size)?;
        writer.write_u32::<LittleEndian>(self.palette_count)?;
        Ok(())
    }
}

/// 读取名称 (单字节字符)
pub(crate) fn read_name<R: Read>(reader: &mut R, length: u64) -> Result<String> {
    let mut bytes = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < length {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(bytes.into_iter().map(char::from).collect())
}

/// 名称转为单字节字符，超出范围的字符写为 '?'
fn name_bytes(name: &str) -> Vec<u8> {
    name.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}

/// 读取第一代图像库 (标识之后)
pub fn read_library<R: Read>(reader: &mut R, template: &RecordTemplate) -> Result<ImageTable> {
    let header = Gen1Header::read(reader)?;
    let variant = header.variant();
    info!(
        "读取 {}: 调色板 {} 个, 图像数据偏移 {}",
        variant.name(),
        header.palette_count,
        header.image_data_offset
    );

    let mut table = ImageTable::new(variant);
    for _ in 0..header.palette_count {
        table.palettes.push(Palette::read(reader)?);
    }

    loop {
        let image_number = reader.read_i32::<LittleEndian>()?;
        if image_number == -1 {
            break;
        }
        let number = usize::try_from(image_number)
            .map_err(|_| IlbError::BadSentinel(image_number as u32))?;

        match read_record(reader, template, image_number, &mut table.palettes, variant)? {
            Some(tree) => {
                let end = reader.read_u32::<LittleEndian>()?;
                if end != RECORD_END {
                    return Err(IlbError::BadSentinel(end));
                }
                table.place_tree(number, tree);
            }
            None => {
                // 空白图像：编号之后直接是 0，再跳过一个双字
                warn!("图像 {} 是空白标记，已跳过", image_number);
                reader.read_u32::<LittleEndian>()?;
            }
        }
    }

    // 数据区按图像编号顺序排列
    if variant == ContainerVariant::Gen1V4 {
        let ids: Vec<RecordId> = (0..table.len()).filter_map(|i| table.id_at(i)).collect();
        for id in ids {
            table.decode_pixels(id, reader)?;
        }
    }

    info!(
        "读取完成: {} 个图像, 共 {} 条记录",
        table.populated(),
        table.record_count()
    );
    Ok(table)
}

/// 读取一条记录 (类型码开始)，类型码为 0 时返回 None
fn read_record<R: Read>(
    reader: &mut R,
    template: &RecordTemplate,
    image_number: i32,
    palettes: &mut Vec<Palette>,
    variant: ContainerVariant,
) -> Result<Option<RecordTree>> {
    let mut code = reader.read_u32::<LittleEndian>()?;
    let composite = code == COMPOSITE_MARKER;
    if composite {
        code = reader.read_u32::<LittleEndian>()?;
    } else if code == COMPOSITE_END {
        return Ok(None);
    }

    let mut record = ImageRecord::new(template);
    record.image_number = image_number;
    record.image_type = ImageType::from_gen1_code(code)?;
    let image_type = record.image_type;

    let sub_id = reader.read_u8()?;
    record.sub_type = SubType::from_sub_id(sub_id)?;
    let inline = sub_id == 1;

    let name_length = reader.read_u32::<LittleEndian>()?;
    record.name = read_name(reader, name_length as u64)?;
    record.width = reader.read_i32::<LittleEndian>()?;
    record.height = reader.read_i32::<LittleEndian>()?;
    record.x_shift = reader.read_i32::<LittleEndian>()?;
    record.y_shift = reader.read_i32::<LittleEndian>()?;
    record.instance_number = reader.read_i32::<LittleEndian>()?;
    debug!(
        "图像 {}({}): '{}', {}, {}x{}",
        image_number,
        record.instance_number,
        record.name,
        image_type.name(),
        record.width,
        record.height
    );

    record.load_mode = LoadMode::from_byte(reader.read_u8()?);
    record.data_size = reader.read_i32::<LittleEndian>()?;
    if record.data_size < 0 {
        return Err(IlbError::InvalidDataSize(record.data_size));
    }
    if !inline {
        record.data_offset = reader.read_u32::<LittleEndian>()? as i32;
    }
    // 显示尺寸，读取时忽略
    reader.read_u32::<LittleEndian>()?;
    reader.read_u32::<LittleEndian>()?;

    if image_type.is_8bpp() {
        reader.read_u8()?;
        if record.sub_type == SubType::Format3 {
            reader.read_u32::<LittleEndian>()?;
            reader.read_u32::<LittleEndian>()?;
        }
    } else if record.sub_type == SubType::Format3 {
        let draw_mode = reader.read_u32::<LittleEndian>()?;
        record.blend_value = reader.read_i32::<LittleEndian>()?;
        record.show_mode = ShowMode::from_code(draw_mode & 0xFF)?;
        if let Some(blend_mode) = BlendMode::from_code((draw_mode >> 8) & 0xFF) {
            record.blend_mode = blend_mode;
        }
    }

    if image_type.is_8bpp() {
        if !inline {
            record.palette_index = reader.read_i32::<LittleEndian>()?;
            record.palette(palettes)?;
        }
    } else {
        let pixel_format = reader.read_u32::<LittleEndian>()?;
        if pixel_format != PIXEL_FORMAT_RGB565 {
            return Err(IlbError::InvalidPixelFormat(pixel_format));
        }
    }

    if image_type.has_bounding_box() {
        let width = reader.read_i32::<LittleEndian>()?;
        let height = reader.read_i32::<LittleEndian>()?;
        let x_offset = reader.read_i32::<LittleEndian>()?;
        let y_offset = reader.read_i32::<LittleEndian>()?;
        record.bounding_box =
            crate::image::BoundingBox::from_extent(width, height, x_offset, y_offset);
        record.stored_background = reader.read_u32::<LittleEndian>()?;
    }

    // RLE8 的裁剪字段没有意义
    if image_type.has_clip_field() {
        let raw = reader.read_u32::<LittleEndian>()?;
        if !image_type.is_8bpp() {
            record.clip_hint = ClipHint::from_raw(raw).unwrap_or_else(|| {
                warn!("图像 {} 的裁剪提示未知: 0x{:08X}", image_number, raw);
                ClipHint::None
            });
        }
    }

    if inline {
        if image_type.is_8bpp() {
            palettes.push(Palette::read(reader)?);
            record.palette_index = palettes.len() as i32 - 1;
        }
        record.decode_pixels(reader, palettes)?;
    } else if variant == ContainerVariant::Gen1V3 {
        debug!("V3 图像 {} 的像素数据不在文件中", image_number);
    }

    let mut children = Vec::new();
    if composite {
        while let Some(child) = read_record(reader, template, image_number, palettes, variant)? {
            children.push(child);
        }
    }

    Ok(Some(RecordTree { record, children }))
}

/// 写入 V4 图像库
pub fn write_library<W: Write>(writer: &mut W, table: &mut ImageTable) -> Result<()> {
    if table.populated() == 0 {
        return Err(IlbError::EmptyLibrary);
    }
    table.renumber();

    let palette = first_palette(table)?;
    let mut info_data = Vec::new();
    let mut image_data = Vec::new();
    if let Some(palette) = &palette {
        palette.write(&mut info_data)?;
    }

    let ids: Vec<RecordId> = (0..table.len()).filter_map(|i| table.id_at(i)).collect();
    for id in ids {
        let Some(record) = table.record(id) else {
            continue;
        };
        info_data.write_i32::<LittleEndian>(record.image_number)?;
        write_node(&mut info_data, &mut image_data, table, id, palette.as_ref())?;
        info_data.write_u32::<LittleEndian>(RECORD_END)?;
    }
    info_data.write_i32::<LittleEndian>(-1)?;

    let image_data_offset = HEADER_V4_LENGTH + 4 + info_data.len() as u32;
    let header = Gen1Header {
        unknown1: if palette.is_some() {
            UNKNOWN1_WITH_PALETTE
        } else {
            UNKNOWN1_WITHOUT_PALETTE
        },
        version: 4.0,
        length: HEADER_V4_LENGTH,
        image_data_offset,
        file_size: image_data_offset + image_data.len() as u32,
        palette_count: palette.is_some() as u32,
    };

    header.write(writer)?;
    writer.write_all(&info_data)?;
    writer.write_all(&image_data)?;
    info!(
        "写入完成: {} 个图像, 文件大小 {} 字节",
        table.populated(),
        header.file_size
    );
    Ok(())
}

/// 第一个 8 位记录的调色板，写入的文件只保存这一个调色板
fn first_palette(table: &ImageTable) -> Result<Option<Palette>> {
    for (_, _, record) in table.iter() {
        if record.image_type.is_8bpp() {
            return Ok(record.palette(&table.palettes)?.cloned());
        }
    }
    Ok(None)
}

/// 写入一个记录节点：组合标记、像素、记录信息、子图像
fn write_node(
    info_data: &mut Vec<u8>,
    image_data: &mut Vec<u8>,
    table: &ImageTable,
    id: RecordId,
    palette: Option<&Palette>,
) -> Result<()> {
    let Some(record) = table.record(id) else {
        return Ok(());
    };
    let code = record
        .image_type
        .gen1_code()
        .ok_or(IlbError::UnsupportedImageType(0x0030_0016))?;

    if record.is_composite() {
        info_data.write_u32::<LittleEndian>(COMPOSITE_MARKER)?;
    }

    if record.image_type.is_8bpp() {
        let own = record.palette(&table.palettes)?;
        if own != palette {
            warn!("图像 {} 使用的调色板与写入的调色板不同", record.image_number);
        }
    }

    let normalized = record.normalize(&table.palettes)?;
    let encoded = record.encode_pixels(&normalized, image_data)?;
    write_info(info_data, record, code, &encoded)?;

    if record.is_composite() {
        for sub in &record.sub_images {
            write_node(info_data, image_data, table, *sub, palette)?;
        }
        info_data.write_u32::<LittleEndian>(COMPOSITE_END)?;
    }
    Ok(())
}

/// 写入记录信息 (类型码开始)
fn write_info(
    info_data: &mut Vec<u8>,
    record: &ImageRecord,
    code: u32,
    encoded: &EncodedImage,
) -> Result<()> {
    let image_type = record.image_type;
    info_data.write_u32::<LittleEndian>(code)?;
    info_data.write_u8(record.sub_type.sub_id())?;

    let name = name_bytes(&record.name);
    info_data.write_u32::<LittleEndian>(name.len() as u32)?;
    info_data.write_all(&name)?;

    info_data.write_i32::<LittleEndian>(encoded.width as i32)?;
    info_data.write_i32::<LittleEndian>(encoded.height as i32)?;
    info_data.write_i32::<LittleEndian>(record.x_shift)?;
    info_data.write_i32::<LittleEndian>(record.y_shift)?;
    info_data.write_i32::<LittleEndian>(record.instance_number)?;
    info_data.write_u8(record.load_mode.to_byte())?;
    info_data.write_u32::<LittleEndian>(encoded.data_size)?;
    info_data.write_u32::<LittleEndian>(encoded.data_offset)?;
    // 显示尺寸：宽高加上偏移
    info_data.write_i32::<LittleEndian>(encoded.width as i32 + record.x_shift)?;
    info_data.write_i32::<LittleEndian>(encoded.height as i32 + record.y_shift)?;

    if image_type.is_8bpp() {
        info_data.write_u8(0)?;
        if record.sub_type == SubType::Format3 {
            info_data.write_u32::<LittleEndian>(1)?;
            info_data.write_u32::<LittleEndian>(1)?;
        }
        // 只写入一个调色板
        info_data.write_i32::<LittleEndian>(0)?;
    } else {
        if record.sub_type == SubType::Format3 {
            let draw_mode = record.show_mode.code() | (record.blend_mode.code() << 8);
            info_data.write_u32::<LittleEndian>(draw_mode)?;
            info_data.write_i32::<LittleEndian>(record.blend_value)?;
        }
        info_data.write_u32::<LittleEndian>(PIXEL_FORMAT_RGB565)?;
    }

    if image_type.has_bounding_box() {
        let (width, height, x_offset, y_offset) = encoded.bounding_box.extent();
        info_data.write_i32::<LittleEndian>(width)?;
        info_data.write_i32::<LittleEndian>(height)?;
        info_data.write_i32::<LittleEndian>(x_offset)?;
        info_data.write_i32::<LittleEndian>(y_offset)?;
        info_data.write_u32::<LittleEndian>(encoded.background)?;
    }

    if image_type.has_clip_field() {
        let raw = if image_type.is_8bpp() {
            0
        } else {
            record.clip_hint.raw()
        };
        info_data.write_u32::<LittleEndian>(raw)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::bitmap::{PixelBuffer, Plane};
    use crate::image::palette::Color;
    use crate::image::to_rgb565;
    use std::io::Cursor;

    /// 手工构造的最小 V4 文件：一个 2x2 的 Plain16 图像
    fn minimal_v4() -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(ILB_IDENTIFIER).unwrap();
        data.write_u32::<LittleEndian>(UNKNOWN1_WITHOUT_PALETTE).unwrap();
        data.write_f32::<LittleEndian>(4.0).unwrap();
        data.write_u32::<LittleEndian>(24).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();

        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0x10).unwrap();
        data.write_u8(2).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.push(b'a');
        for value in [2, 2, 0, 0, 0] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(0).unwrap();
        data.write_i32::<LittleEndian>(8).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(2).unwrap();
        data.write_u32::<LittleEndian>(2).unwrap();
        data.write_u32::<LittleEndian>(PIXEL_FORMAT_RGB565).unwrap();
        data.write_u32::<LittleEndian>(RECORD_END).unwrap();
        data.write_i32::<LittleEndian>(-1).unwrap();

        for pixel in [0x0000u16, 0xF800, 0x07E0, 0x001F] {
            data.write_u16::<LittleEndian>(pixel).unwrap();
        }
        data
    }

    fn read(data: &[u8]) -> Result<ImageTable> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        assert_eq!(magic, ILB_IDENTIFIER);
        read_library(&mut cursor, &RecordTemplate::default())
    }

    #[test]
    fn test_read_minimal_v4() {
        let table = read(&minimal_v4()).unwrap();
        assert_eq!(table.variant, ContainerVariant::Gen1V4);
        assert_eq!(table.populated(), 1);

        let record = table.get(0).unwrap();
        assert_eq!(record.image_type, ImageType::Plain16);
        assert_eq!(record.name, "a");
        assert_eq!((record.width, record.height), (2, 2));
        assert_eq!(record.load_mode, LoadMode::Instant);
        assert!(record.bounding_box.is_empty());
        let Some(PixelBuffer::Rgb565(plane)) = &record.pixels else {
            panic!("期望 RGB565 像素");
        };
        assert_eq!(plane.pixels().collect::<Vec<_>>(), vec![0x0000, 0xF800, 0x07E0, 0x001F]);
    }

    #[test]
    fn test_bad_header() {
        let mut data = minimal_v4();
        data[8..12].copy_from_slice(&5.0f32.to_le_bytes());
        assert!(matches!(read(&data), Err(IlbError::UnsupportedVersion(_))));

        let mut data = minimal_v4();
        data[12..16].copy_from_slice(&16u32.to_le_bytes());
        assert!(matches!(
            read(&data),
            Err(IlbError::BadHeaderLength {
                expected: 24,
                found: 16
            })
        ));
    }

    #[test]
    fn test_bad_sentinel() {
        let mut data = minimal_v4();
        // 记录结束标记位于 -1 之前
        let position = data.len() - 8 - 8;
        data[position..position + 4].copy_from_slice(&0x1234u32.to_le_bytes());
        assert!(matches!(read(&data), Err(IlbError::BadSentinel(0x1234))));
    }

    #[test]
    fn test_v3_with_blank_marker() {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(ILB_IDENTIFIER).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_f32::<LittleEndian>(3.0).unwrap();
        data.write_u32::<LittleEndian>(16).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();

        // 空白标记
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap();

        // 子类型 3 的 RLE16 记录，数据不在文件中
        data.write_i32::<LittleEndian>(2).unwrap();
        data.write_u32::<LittleEndian>(0x11).unwrap();
        data.write_u8(3).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        for value in [4, 4, 1, 2, 7] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(4).unwrap();
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(4).unwrap();
        data.write_u32::<LittleEndian>(4).unwrap();
        data.write_u32::<LittleEndian>(0x0402).unwrap();
        data.write_i32::<LittleEndian>(50).unwrap();
        data.write_u32::<LittleEndian>(PIXEL_FORMAT_RGB565).unwrap();
        for value in [2, 2, 1, 1] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u32::<LittleEndian>(0xF81F).unwrap();
        data.write_u32::<LittleEndian>(0x0046_6014).unwrap();
        data.write_u32::<LittleEndian>(RECORD_END).unwrap();
        data.write_i32::<LittleEndian>(-1).unwrap();

        let table = read(&data).unwrap();
        assert_eq!(table.variant, ContainerVariant::Gen1V3);
        assert_eq!(table.len(), 3);
        assert_eq!(table.populated(), 1);

        let record = table.get(2).unwrap();
        assert_eq!(record.image_type, ImageType::Rle16);
        assert_eq!(record.instance_number, 7);
        assert_eq!(record.load_mode, LoadMode::WhenUsed);
        assert_eq!(record.show_mode, ShowMode::Blended);
        assert_eq!(record.blend_mode, BlendMode::Shadow);
        assert_eq!(record.blend_value, 50);
        assert_eq!(record.clip_hint, ClipHint::AsShieldsM);
        assert_eq!(record.bounding_box, crate::image::BoundingBox::new(1, 1, 2, 2));
        assert_eq!(record.stored_background, 0xF81F);
        assert!(record.pixels.is_none());
    }

    #[test]
    fn test_invalid_show_mode() {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(ILB_IDENTIFIER).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_f32::<LittleEndian>(3.0).unwrap();
        data.write_u32::<LittleEndian>(16).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();

        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0x10).unwrap();
        data.write_u8(3).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        for value in [1, 1, 0, 0, 0] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(1).unwrap();
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(0x0105).unwrap();
        data.write_i32::<LittleEndian>(0).unwrap();

        assert!(matches!(read(&data), Err(IlbError::InvalidDrawMode(5))));
    }

    fn indexed_sprite(seed: u8) -> Plane<u8> {
        #[rustfmt::skip]
        let pixels = [
            0, 0, 0, 0, 0,
            0, seed, seed + 1, 0, 0,
            0, 0, seed + 2, 0, 0,
        ];
        Plane::from_pixels(5, 3, &pixels).unwrap()
    }

    fn palette() -> Palette {
        let mut palette = Palette::grayscale();
        palette.set(0, Color::new(0xFF, 0x00, 0xFF));
        palette
    }

    #[test]
    fn test_composite_round_trip() {
        let template = RecordTemplate::default();
        let mut table = ImageTable::new(ContainerVariant::Gen1V4);
        table.palettes.push(palette());

        let mut parent = ImageRecord::from_pixels(&template, PixelBuffer::Indexed8(indexed_sprite(10)), "parent");
        parent.background_color = 0x00FF_00FF;
        let parent_id = table.place(0, parent);
        for (seed, name) in [(20, "child1"), (30, "child2")] {
            let mut child = ImageRecord::from_pixels(&template, PixelBuffer::Indexed8(indexed_sprite(seed)), name);
            child.background_color = 0x00FF_00FF;
            table.add_sub_image(parent_id, child).unwrap();
        }

        let mut output = Vec::new();
        write_library(&mut output, &mut table).unwrap();

        let loaded = read(&output).unwrap();
        assert_eq!(loaded.populated(), 1);
        assert_eq!(loaded.record_count(), 3);
        assert_eq!(loaded.palettes.len(), 1);
        assert_eq!(loaded.palettes[0], palette());

        let (_, id, parent) = loaded.iter().next().unwrap();
        assert_eq!(parent.name, "parent");
        assert_eq!(parent.pixels, Some(PixelBuffer::Indexed8(indexed_sprite(10))));
        let children: Vec<_> = loaded.sub_images(id).collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "child1");
        assert_eq!(children[0].image_number, 0);
        assert_eq!(children[0].pixels, Some(PixelBuffer::Indexed8(indexed_sprite(20))));
        assert_eq!(children[1].pixels, Some(PixelBuffer::Indexed8(indexed_sprite(30))));
        assert_eq!(children[1].bounding_box, crate::image::BoundingBox::new(1, 1, 2, 2));
    }

    #[test]
    fn test_write_header_fields() {
        let template = RecordTemplate::with_type(ImageType::Rle16);
        let mut table = ImageTable::new(ContainerVariant::Gen1V4);
        let plane = Plane::from_pixels(3, 1, &[0u16, 0xFFFF, 0]).unwrap();
        table.add(ImageRecord::from_pixels(&template, PixelBuffer::Rgb565(plane), "x"));

        let mut output = Vec::new();
        write_library(&mut output, &mut table).unwrap();

        let mut cursor = Cursor::new(output.as_slice());
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), ILB_IDENTIFIER);
        let header = Gen1Header::read(&mut cursor).unwrap();
        assert_eq!(header.unknown1, UNKNOWN1_WITHOUT_PALETTE);
        assert_eq!(header.palette_count, 0);
        assert_eq!(header.file_size as usize, output.len());

        // 单个 RLE16 行: 长度 + (0xFFFF) 加一个补齐单元
        let image_data = &output[header.image_data_offset as usize..];
        assert_eq!(image_data, &[6, 0, 0, 0, 0xFF, 0xFF, 0, 0]);

        let loaded = read(&output).unwrap();
        let record = loaded.get(0).unwrap();
        assert_eq!(record.bounding_box, crate::image::BoundingBox::new(0, 1, 1, 0));
        assert_eq!(record.stored_background, to_rgb565(0) as u32);
    }

    #[test]
    fn test_empty_library() {
        let mut table = ImageTable::new(ContainerVariant::Gen1V4);
        let mut output = Vec::new();
        assert!(matches!(
            write_library(&mut output, &mut table),
            Err(IlbError::EmptyLibrary)
        ));
        assert!(output.is_empty());
    }

    fn v4_header(palettes: &[Palette]) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(ILB_IDENTIFIER).unwrap();
        data.write_u32::<LittleEndian>(UNKNOWN1_WITH_PALETTE).unwrap();
        data.write_f32::<LittleEndian>(4.0).unwrap();
        data.write_u32::<LittleEndian>(24).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(palettes.len() as u32).unwrap();
        for palette in palettes {
            palette.write(&mut data).unwrap();
        }
        data
    }

    /// 无名称的 Plain16 记录，包括编号和结束标记
    fn plain16_record(data: &mut Vec<u8>, number: i32, width: i32, height: i32, data_size: i32) {
        data.write_i32::<LittleEndian>(number).unwrap();
        data.write_u32::<LittleEndian>(0x10).unwrap();
        data.write_u8(2).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        for value in [width, height, 0, 0, 0] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(0).unwrap();
        data.write_i32::<LittleEndian>(data_size).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_i32::<LittleEndian>(width).unwrap();
        data.write_i32::<LittleEndian>(height).unwrap();
        data.write_u32::<LittleEndian>(PIXEL_FORMAT_RGB565).unwrap();
        data.write_u32::<LittleEndian>(RECORD_END).unwrap();
    }

    fn first_rgb565(record: &ImageRecord) -> u16 {
        let Some(PixelBuffer::Rgb565(plane)) = &record.pixels else {
            panic!("期望 RGB565 像素");
        };
        plane.first()
    }

    #[test]
    fn test_v4_data_follows_image_numbers() {
        // 记录信息按 1、0 排列，数据区按编号排列
        let mut data = v4_header(&[]);
        plain16_record(&mut data, 1, 1, 1, 2);
        plain16_record(&mut data, 0, 1, 1, 2);
        data.write_i32::<LittleEndian>(-1).unwrap();
        data.write_u16::<LittleEndian>(0xAAAA).unwrap();
        data.write_u16::<LittleEndian>(0xBBBB).unwrap();

        let table = read(&data).unwrap();
        assert_eq!(table.populated(), 2);
        assert_eq!(first_rgb565(table.get(0).unwrap()), 0xAAAA);
        assert_eq!(first_rgb565(table.get(1).unwrap()), 0xBBBB);
    }

    #[test]
    fn test_oversized_dimensions() {
        let mut data = v4_header(&[]);
        plain16_record(&mut data, 0, 0x2000_0000, 1, 0);
        data.write_i32::<LittleEndian>(-1).unwrap();
        assert!(matches!(read(&data), Err(IlbError::CorruptPixelData(_))));
    }

    #[test]
    fn test_data_size_beyond_stream() {
        let mut data = v4_header(&[]);
        plain16_record(&mut data, 0, 1, 1, i32::MAX);
        data.write_i32::<LittleEndian>(-1).unwrap();
        data.write_u16::<LittleEndian>(0x1234).unwrap();
        assert!(matches!(read(&data), Err(IlbError::Io(_))));
    }

    #[test]
    fn test_palette_index_checked_on_read() {
        let mut data = v4_header(&[palette()]);
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0x01).unwrap();
        data.write_u8(2).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        for value in [1, 1, 0, 0, 0] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(0).unwrap();
        data.write_i32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u8(0).unwrap();
        data.write_i32::<LittleEndian>(3).unwrap();
        data.write_u32::<LittleEndian>(RECORD_END).unwrap();
        data.write_i32::<LittleEndian>(-1).unwrap();
        data.write_u8(0).unwrap();

        assert!(matches!(
            read(&data),
            Err(IlbError::InvalidPaletteIndex { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_inline_record_with_palette() {
        let mut inline_palette = Palette::grayscale();
        inline_palette.set(9, Color::new(0x12, 0x34, 0x56));

        let mut data = v4_header(&[palette()]);
        // 编号 0：子类型 1 的 Plain8，调色板和像素紧跟在记录信息之后
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_u32::<LittleEndian>(0x01).unwrap();
        data.write_u8(1).unwrap();
        data.write_u32::<LittleEndian>(2).unwrap();
        data.extend_from_slice(b"in");
        for value in [2, 1, 0, 0, 0] {
            data.write_i32::<LittleEndian>(value).unwrap();
        }
        data.write_u8(0).unwrap();
        data.write_i32::<LittleEndian>(2).unwrap();
        data.write_u32::<LittleEndian>(2).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u8(0).unwrap();
        inline_palette.write(&mut data).unwrap();
        data.extend_from_slice(&[9, 3]);
        data.write_u32::<LittleEndian>(RECORD_END).unwrap();

        // 编号 1：普通记录，像素在数据区
        plain16_record(&mut data, 1, 1, 1, 2);
        data.write_i32::<LittleEndian>(-1).unwrap();
        data.write_u16::<LittleEndian>(0x07E0).unwrap();

        let table = read(&data).unwrap();
        assert_eq!(table.palettes, vec![palette(), inline_palette.clone()]);

        let record = table.get(0).unwrap();
        assert_eq!(record.name, "in");
        assert_eq!(record.image_type, ImageType::Plain8);
        assert_eq!(record.sub_type, SubType::Format2);
        assert_eq!(record.palette_index, 1);
        let Some(PixelBuffer::Indexed8(plane)) = &record.pixels else {
            panic!("期望 8 位像素");
        };
        assert_eq!(plane.pixels().collect::<Vec<_>>(), vec![9, 3]);
        assert_eq!(record.stored_background, 9);
        assert_eq!(record.background_color, 0x0012_3456);

        assert_eq!(first_rgb565(table.get(1).unwrap()), 0x07E0);
    }

    #[test]
    fn test_indexed_background_from_factory() {
        let mut table = ImageTable::new(ContainerVariant::Gen1V4);
        table.palettes.push(Palette::grayscale());
        #[rustfmt::skip]
        let pixels = [
            5, 5, 5, 5,
            5, 5, 0, 5,
        ];
        let plane = Plane::from_pixels(4, 2, &pixels).unwrap();
        let template = RecordTemplate::with_type(ImageType::Rle8);
        table.add(ImageRecord::from_pixels(&template, PixelBuffer::Indexed8(plane.clone()), "bg5"));

        let mut output = Vec::new();
        write_library(&mut output, &mut table).unwrap();

        let loaded = read(&output).unwrap();
        let record = loaded.get(0).unwrap();
        assert_eq!(record.stored_background, 5);
        assert_eq!(record.bounding_box, crate::image::BoundingBox::new(1, 2, 2, 1));
        assert_eq!(record.background_color, 0x0005_0505);
        assert_eq!(record.pixels, Some(PixelBuffer::Indexed8(plane)));
    }
}

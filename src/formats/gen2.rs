//! 第二代 ILB 容器 (标签格式，只读)
//!
//! 文件结构:
//! - 标签数量 (u8)，大于 0x80 时减去 0x80，后跟一个 u32 表示双字标签数量
//! - (u8 标签, u8 偏移) 对，然后是 (u32 标签, u32 偏移) 对
//! - 按标签顺序排列的数据：0x0A 未知双字、0x0B 最大元素数、0x0C 调色板块
//! - 0x32 起每个标签对应一条图像记录，图像编号为 `标签 - 0x32`
//! - 记录信息之后是图像数据区，每条记录按自身的偏移定位

use crate::config::RecordTemplate;
use crate::error::{IlbError, Result};
use crate::formats::ContainerVariant;
use crate::formats::gen1::read_name;
use crate::formats::record::{BlendMode, ImageRecord, ImageType, LoadMode, PIXEL_FORMAT_RGB565, ShowMode};
use crate::formats::table::{ImageTable, RecordId};
use crate::image::bbox::BoundingBox;
use crate::image::palette::Palette;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info, warn};

/// 扩展标签数量标志
const EXTENDED_TAG_FLAG: u8 = 0x80;
/// 第一个图像记录标签
pub const IMAGE_TAG_BASE: u32 = 0x32;

const TAG_UNKNOWN: u32 = 0x0A;
const TAG_MAX_ELEMENTS: u32 = 0x0B;
const TAG_PALETTES: u32 = 0x0C;

/// 调色板块开头跳过的字节数
const PALETTE_BLOCK_SKIP: i64 = 6;
/// 每个调色板之前跳过的字节数
const PALETTE_ENTRY_SKIP: i64 = 15;

/// 记录字段标签
mod field {
    pub const NAME: u8 = 0x0A;
    pub const WIDTH: u8 = 0x0B;
    pub const HEIGHT: u8 = 0x0C;
    pub const X_SHIFT: u8 = 0x0D;
    pub const Y_SHIFT: u8 = 0x0E;
    pub const INSTANCE: u8 = 0x0F;
    pub const LOAD_MODE: u8 = 0x10;
    pub const DATA_SIZE: u8 = 0x11;
    pub const TOTAL_WIDTH: u8 = 0x12;
    pub const TOTAL_HEIGHT: u8 = 0x13;
    pub const IMAGE_OFFSET: u8 = 0x14;
    pub const HOT_SPOT_X: u8 = 0x16;
    pub const HOT_SPOT_Y: u8 = 0x17;
    pub const DESCRIPTION: u8 = 0x18;
    pub const BLEND: u8 = 0x19;
    pub const PIXEL_FORMAT: u8 = 0x32;
    pub const BBOX_WIDTH: u8 = 0x3C;
    pub const BBOX_HEIGHT: u8 = 0x3D;
    pub const BBOX_X: u8 = 0x3E;
    pub const BBOX_Y: u8 = 0x3F;
    pub const BACKGROUND: u8 = 0x40;
}

/// 混合信息中带混合值的标志
const BLEND_WITH_VALUE: u8 = 3;

/// 第二代文件头：标签到偏移的映射
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gen2Header {
    pub tags: BTreeMap<u32, u32>,
}

impl Gen2Header {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut word_fields = reader.read_u8()?;
        let mut dword_fields = 0u32;
        if word_fields > EXTENDED_TAG_FLAG {
            word_fields -= EXTENDED_TAG_FLAG;
            dword_fields = reader.read_u32::<LittleEndian>()?;
        }

        let mut tags = BTreeMap::new();
        for _ in 0..word_fields {
            let tag = reader.read_u8()? as u32;
            let offset = reader.read_u8()? as u32;
            if tags.insert(tag, offset).is_some() {
                warn!("文件头标签 0x{:X} 重复出现", tag);
            }
        }
        for _ in 0..dword_fields {
            let tag = reader.read_u32::<LittleEndian>()?;
            let offset = reader.read_u32::<LittleEndian>()?;
            if tags.insert(tag, offset).is_some() {
                warn!("文件头标签 0x{:X} 重复出现", tag);
            }
        }
        debug!("文件头: {} 个单字标签, {} 个双字标签", word_fields, dword_fields);
        Ok(Self { tags })
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.tags.contains_key(&tag)
    }

    /// 图像记录的编号，按标签顺序
    pub fn image_numbers(&self) -> Result<Vec<usize>> {
        self.tags
            .keys()
            .filter(|tag| !matches!(**tag, TAG_UNKNOWN | TAG_MAX_ELEMENTS | TAG_PALETTES))
            .map(|&tag| {
                tag.checked_sub(IMAGE_TAG_BASE)
                    .map(|number| number as usize)
                    .ok_or(IlbError::UnknownHeaderTag(tag))
            })
            .collect()
    }
}

/// 读取第二代图像库
///
/// 记录信息按标签顺序读取，像素数据按图像编号顺序，每条记录都定位到 `信息区末尾 + 图像偏移`。
pub fn read_library<R: Read + Seek>(reader: &mut R, template: &RecordTemplate) -> Result<ImageTable> {
    let header = Gen2Header::read(reader)?;
    let image_numbers = header.image_numbers()?;

    let mut table = ImageTable::new(ContainerVariant::Gen2Tagged);
    if header.contains(TAG_UNKNOWN) {
        reader.read_u32::<LittleEndian>()?;
    }
    if header.contains(TAG_MAX_ELEMENTS) {
        let max_elements = reader.read_u32::<LittleEndian>()?;
        debug!("最大元素数 {}", max_elements);
    }
    if header.contains(TAG_PALETTES) {
        reader.seek(SeekFrom::Current(PALETTE_BLOCK_SKIP))?;
        let count = reader.read_u8()?;
        for _ in 0..count {
            reader.seek(SeekFrom::Current(PALETTE_ENTRY_SKIP))?;
            table.palettes.push(Palette::read(reader)?);
        }
    }
    info!(
        "读取 {}: 调色板 {} 个, 图像 {} 个",
        ContainerVariant::Gen2Tagged.name(),
        table.palettes.len(),
        image_numbers.len()
    );

    let mut offsets = Vec::with_capacity(image_numbers.len());
    for number in image_numbers {
        let (record, image_offset) = read_record(reader, template, number)?;
        record.palette(&table.palettes)?;
        let id = table.place(number, record);
        offsets.push((number, id, image_offset));
    }

    let start = reader.stream_position()?;
    offsets.sort_by_key(|(number, _, _)| *number);
    // 重复编号时只有最后放入的记录留在表中
    let live: HashSet<RecordId> = (0..table.len()).filter_map(|i| table.id_at(i)).collect();
    for (number, id, image_offset) in offsets {
        if !live.contains(&id) {
            continue;
        }
        let position = start + image_offset as u64;
        if reader.stream_position()? != position {
            reader.seek(SeekFrom::Start(position))?;
        }
        debug!("图像 {} 的数据位于 {}", number, position);
        table.decode_pixels(id, reader)?;
    }

    info!("读取完成: {} 个图像", table.populated());
    Ok(table)
}

/// 读取一条图像记录信息，返回记录和它的图像偏移
fn read_record<R: Read>(
    reader: &mut R,
    template: &RecordTemplate,
    image_number: usize,
) -> Result<(ImageRecord, u32)> {
    let code = reader.read_u32::<LittleEndian>()?;
    let (image_type, has_mask) = ImageType::from_gen2_code(code)?;

    let mut record = ImageRecord::new(template);
    record.image_number = image_number as i32;
    record.image_type = image_type;
    record.has_mask = has_mask;

    let count = reader.read_u8()?;
    let mut fields = BTreeMap::new();
    for _ in 0..count {
        let tag = reader.read_u8()?;
        fields.insert(tag, reader.read_u8()?);
    }
    let has = |tag: u8| fields.contains_key(&tag);

    if has(field::NAME) {
        let length = reader.read_u8()?;
        record.name = read_name(reader, length as u64)?;
    }
    if has(field::WIDTH) {
        record.width = reader.read_i32::<LittleEndian>()?;
    }
    if has(field::HEIGHT) {
        record.height = reader.read_i32::<LittleEndian>()?;
    }
    if has(field::X_SHIFT) {
        record.x_shift = reader.read_i32::<LittleEndian>()?;
    }
    if has(field::Y_SHIFT) {
        record.y_shift = reader.read_i32::<LittleEndian>()?;
    }
    if has(field::INSTANCE) {
        record.instance_number = reader.read_i32::<LittleEndian>()?;
    }
    debug!(
        "图像 {}({}): '{}', {}, {}x{}",
        image_number,
        record.instance_number,
        record.name,
        image_type.name(),
        record.width,
        record.height
    );

    if has(field::LOAD_MODE) {
        record.load_mode = LoadMode::from_byte(reader.read_u8()?);
    }
    if has(field::DATA_SIZE) {
        record.data_size = reader.read_i32::<LittleEndian>()?;
        if record.data_size < 0 {
            return Err(IlbError::InvalidDataSize(record.data_size));
        }
    }
    for tag in [
        field::TOTAL_WIDTH,
        field::TOTAL_HEIGHT,
        field::HOT_SPOT_X,
        field::HOT_SPOT_Y,
    ] {
        if has(tag) {
            reader.read_u32::<LittleEndian>()?;
        }
    }
    if has(field::DESCRIPTION) {
        let length = reader.read_u8()?;
        record.description = read_name(reader, length as u64)?;
    }
    if has(field::BLEND) {
        read_blend(reader, &mut record)?;
    }

    if has(field::PIXEL_FORMAT) {
        let value = reader.read_u32::<LittleEndian>()?;
        if image_type.is_8bpp() {
            record.palette_index = value as i32 - 1;
        } else if value != PIXEL_FORMAT_RGB565 {
            return Err(IlbError::InvalidPixelFormat(value));
        }
    }

    let mut extent = [0i32; 4];
    for (slot, tag) in extent
        .iter_mut()
        .zip([field::BBOX_WIDTH, field::BBOX_HEIGHT, field::BBOX_X, field::BBOX_Y])
    {
        if has(tag) {
            *slot = reader.read_i32::<LittleEndian>()?;
        }
    }
    let [width, height, x_offset, y_offset] = extent;
    record.bounding_box = BoundingBox::from_extent(width, height, x_offset, y_offset);

    if has(field::BACKGROUND) {
        record.stored_background = if image_type.is_8bpp() {
            reader.read_u8()? as u32
        } else {
            reader.read_u32::<LittleEndian>()?
        };
    }

    let image_offset = if has(field::IMAGE_OFFSET) {
        reader.read_u32::<LittleEndian>()?
    } else {
        0
    };
    Ok((record, image_offset))
}

/// 混合信息：标志、未知双字、(可选) 两个字节、未知字节、混合方式、(可选) 混合值
fn read_blend<R: Read>(reader: &mut R, record: &mut ImageRecord) -> Result<()> {
    let info_byte = reader.read_u8()?;
    reader.read_u32::<LittleEndian>()?;
    if info_byte == BLEND_WITH_VALUE {
        reader.read_u8()?;
        reader.read_u8()?;
    }
    reader.read_u8()?;

    record.show_mode = ShowMode::Blended;
    match reader.read_u8()? {
        0 => {
            record.blend_mode = BlendMode::Alpha;
            record.show_mode = ShowMode::Opaque;
        }
        1 => record.blend_mode = BlendMode::Alpha,
        2 => record.blend_mode = BlendMode::Intensity,
        3 => record.blend_mode = BlendMode::Shadow,
        4 => record.blend_mode = BlendMode::Brighten,
        other => debug!("图像 {} 的混合方式未知: {}", record.image_number, other),
    }

    if info_byte == BLEND_WITH_VALUE {
        // 文件中为 0..1，记录中为 0..100
        let value = reader.read_f32::<LittleEndian>()?;
        record.blend_value = (100.0 * value) as i32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::bitmap::PixelBuffer;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn field_table(data: &mut Vec<u8>, tags: &[u8]) {
        data.write_u8(tags.len() as u8).unwrap();
        for &tag in tags {
            data.write_u8(tag).unwrap();
            data.write_u8(0).unwrap();
        }
    }

    /// 两个记录：编号 1 的 2x1 Plain16，编号 0 的 2x2 带调色板 Plain8
    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u8(4).unwrap();
        for tag in [TAG_MAX_ELEMENTS as u8, TAG_PALETTES as u8, 0x33, 0x32] {
            data.write_u8(tag).unwrap();
            data.write_u8(0).unwrap();
        }
        data.write_u32::<LittleEndian>(2).unwrap();

        data.extend_from_slice(&[0; 6]);
        data.write_u8(1).unwrap();
        data.extend_from_slice(&[0; 15]);
        Palette::grayscale().write(&mut data).unwrap();

        // 编号 0
        data.write_u32::<LittleEndian>(0x0030_0001).unwrap();
        field_table(
            &mut data,
            &[
                field::NAME,
                field::WIDTH,
                field::HEIGHT,
                field::LOAD_MODE,
                field::DATA_SIZE,
                field::PIXEL_FORMAT,
                field::IMAGE_OFFSET,
            ],
        );
        data.write_u8(2).unwrap();
        data.extend_from_slice(b"p8");
        data.write_i32::<LittleEndian>(2).unwrap();
        data.write_i32::<LittleEndian>(2).unwrap();
        data.write_u8(2).unwrap();
        data.write_i32::<LittleEndian>(4).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(4).unwrap();

        // 编号 1
        data.write_u32::<LittleEndian>(0x0030_0010).unwrap();
        field_table(
            &mut data,
            &[
                field::WIDTH,
                field::HEIGHT,
                field::DATA_SIZE,
                field::DESCRIPTION,
                field::BLEND,
                field::PIXEL_FORMAT,
                field::IMAGE_OFFSET,
            ],
        );
        data.write_i32::<LittleEndian>(2).unwrap();
        data.write_i32::<LittleEndian>(1).unwrap();
        data.write_i32::<LittleEndian>(4).unwrap();
        data.write_u8(3).unwrap();
        data.extend_from_slice(b"sky");
        data.write_u8(BLEND_WITH_VALUE).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.extend_from_slice(&[0, 0, 0]);
        data.write_u8(3).unwrap();
        data.write_f32::<LittleEndian>(0.5).unwrap();
        data.write_u32::<LittleEndian>(PIXEL_FORMAT_RGB565).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();

        // 数据区：编号 1 在前，编号 0 在偏移 4 处
        data.write_u16::<LittleEndian>(0xF800).unwrap();
        data.write_u16::<LittleEndian>(0x001F).unwrap();
        data.extend_from_slice(&[1, 2, 3, 4]);
        data
    }

    #[test]
    fn test_read_tagged_library() {
        let data = sample();
        let table = read_library(&mut Cursor::new(data.as_slice()), &RecordTemplate::default()).unwrap();
        assert_eq!(table.variant, ContainerVariant::Gen2Tagged);
        assert_eq!(table.palettes.len(), 1);
        assert_eq!(table.populated(), 2);

        let first = table.get(0).unwrap();
        assert_eq!(first.name, "p8");
        assert_eq!(first.image_type, ImageType::Plain8);
        assert_eq!(first.load_mode, LoadMode::OnDemand);
        assert_eq!(first.palette_index, 0);
        let Some(PixelBuffer::Indexed8(plane)) = &first.pixels else {
            panic!("期望 8 位像素");
        };
        assert_eq!(plane.pixels().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(first.stored_background, 1);

        let second = table.get(1).unwrap();
        assert_eq!(second.description, "sky");
        assert_eq!(second.show_mode, ShowMode::Blended);
        assert_eq!(second.blend_mode, BlendMode::Shadow);
        assert_eq!(second.blend_value, 50);
        assert!(second.bounding_box.is_empty());
        let Some(PixelBuffer::Rgb565(plane)) = &second.pixels else {
            panic!("期望 RGB565 像素");
        };
        assert_eq!(plane.pixels().collect::<Vec<_>>(), vec![0xF800, 0x001F]);
    }

    #[test]
    fn test_palette_index_out_of_range() {
        let mut data = sample();
        // 编号 0 的调色板字段位于名称、宽、高、加载方式和数据大小之后
        let name = data.windows(2).position(|w| w == b"p8").unwrap();
        let field = name + 2 + 4 + 4 + 1 + 4;
        data[field..field + 4].copy_from_slice(&3u32.to_le_bytes());
        let result = read_library(&mut Cursor::new(data.as_slice()), &RecordTemplate::default());
        assert!(matches!(
            result,
            Err(IlbError::InvalidPaletteIndex { index: 2, count: 1 })
        ));
    }

    #[test]
    fn test_extended_tag_count() {
        let mut data = Vec::new();
        data.write_u8(0x81).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u8(TAG_UNKNOWN as u8).unwrap();
        data.write_u8(0).unwrap();
        data.write_u32::<LittleEndian>(0x1_0032).unwrap();
        data.write_u32::<LittleEndian>(4).unwrap();

        let header = Gen2Header::read(&mut Cursor::new(data.as_slice())).unwrap();
        assert!(header.contains(TAG_UNKNOWN));
        assert_eq!(header.image_numbers().unwrap(), vec![0x1_0000]);
    }

    #[test]
    fn test_unknown_header_tag() {
        let data = [1u8, 0x20, 0];
        let result = read_library(&mut Cursor::new(&data[..]), &RecordTemplate::default());
        assert!(matches!(result, Err(IlbError::UnknownHeaderTag(0x20))));
    }

    #[test]
    fn test_opaque_blend_and_bad_data_size() {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(0x0030_0011).unwrap();
        field_table(&mut data, &[field::BLEND]);
        data.write_u8(2).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u8(0).unwrap();
        data.write_u8(0).unwrap();
        let (record, offset) =
            read_record(&mut Cursor::new(data.as_slice()), &RecordTemplate::default(), 3).unwrap();
        assert_eq!(record.image_type, ImageType::Rle16);
        assert_eq!(record.show_mode, ShowMode::Opaque);
        assert_eq!(record.blend_mode, BlendMode::Alpha);
        assert_eq!(offset, 0);

        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(0x0030_0015).unwrap();
        field_table(&mut data, &[field::DATA_SIZE]);
        data.write_i32::<LittleEndian>(-4).unwrap();
        let result = read_record(&mut Cursor::new(data.as_slice()), &RecordTemplate::default(), 0);
        assert!(matches!(result, Err(IlbError::InvalidDataSize(-4))));
    }

    #[test]
    fn test_masked_sprite_flag() {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(0x0030_0015).unwrap();
        field_table(&mut data, &[]);
        let (record, _) =
            read_record(&mut Cursor::new(data.as_slice()), &RecordTemplate::default(), 0).unwrap();
        assert_eq!(record.image_type, ImageType::Sprite16);
        assert!(record.has_mask);
    }
}

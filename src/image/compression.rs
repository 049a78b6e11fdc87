//! 行程编码 (RLE) 和遮罩压缩
//!
//! 三种格式都只编码包围盒内的像素，解码前先用背景值填满整个平面。
//!
//! - RLE8: 每行以 u32 长度开头（包含自身 4 字节），背景段写为 (背景, 计数 u8)。
//! - RLE16: 每行长度为 `2 * 单元数 + 4`，背景段计数以 `2n` 存储；单元数为奇数时补一个背景单元。
//! - Masked8: 行宽补齐到 4（宽度不小于 32 时为 8）的倍数，背景段可以跨行延续。

use crate::error::{IlbError, Result};
use crate::image::bbox::BoundingBox;
use crate::image::bitmap::{Plane, Sample};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// RLE8 单个背景段的最大长度
pub const MAX_RUN_8: usize = 0xFF;
/// RLE16 单个背景段的最大长度 (2n 需要放进 i16)
pub const MAX_RUN_16: usize = 0x3FFF;

fn corrupt(message: impl Into<String>) -> IlbError {
    IlbError::CorruptPixelData(message.into())
}

/// 将一行编码为单元序列，背景段由 `marker` 生成计数单元
fn encode_row<T: Sample>(
    row: &[T],
    back: T,
    max_run: usize,
    marker: impl Fn(usize) -> T,
    units: &mut Vec<T>,
) {
    let mut run = 0usize;
    let flush = |run: &mut usize, units: &mut Vec<T>| {
        while *run > 0 {
            let count = (*run).min(max_run);
            units.push(back);
            units.push(marker(count));
            *run -= count;
        }
    };

    for value in row {
        if *value == back {
            run += 1;
        } else {
            flush(&mut run, units);
            units.push(*value);
        }
    }
    flush(&mut run, units);
}

/// 解码一行单元序列到平面中，`run_length` 把计数单元换算为像素数
fn decode_row<T: Sample>(
    units: &[T],
    plane: &mut Plane<T>,
    y: u32,
    left: u32,
    back: T,
    run_length: impl Fn(T) -> usize,
) -> Result<()> {
    let width = plane.width() as usize;
    let mut x = left as usize;
    let mut iter = units.iter();
    while let Some(unit) = iter.next() {
        if *unit == back {
            let count = iter
                .next()
                .ok_or_else(|| corrupt(format!("第 {} 行的背景段缺少计数", y)))?;
            x += run_length(*count);
            if x > width {
                return Err(corrupt(format!("第 {} 行的背景段超出图像宽度", y)));
            }
        } else {
            if x >= width {
                return Err(corrupt(format!("第 {} 行的像素超出图像宽度", y)));
            }
            plane.set(x as u32, y, *unit);
            x += 1;
        }
    }
    Ok(())
}

/// RLE8 编码
pub fn encode_rle8<W: Write>(
    writer: &mut W,
    plane: &Plane<u8>,
    bbox: &BoundingBox,
    back: u8,
) -> Result<()> {
    if bbox.is_empty() {
        return Ok(());
    }
    let mut units = Vec::new();
    for y in bbox.rows() {
        units.clear();
        let row = &plane.row(y)[bbox.left as usize..=bbox.right as usize];
        encode_row(row, back, MAX_RUN_8, |count| count as u8, &mut units);
        writer.write_u32::<LittleEndian>(units.len() as u32 + 4)?;
        writer.write_all(&units)?;
    }
    Ok(())
}

/// RLE8 解码
pub fn decode_rle8<R: Read>(
    reader: &mut R,
    plane: &mut Plane<u8>,
    bbox: &BoundingBox,
    back: u8,
) -> Result<()> {
    plane.fill(back);
    if bbox.is_empty() {
        return Ok(());
    }
    let mut units = Vec::new();
    for y in bbox.rows() {
        let length = reader.read_u32::<LittleEndian>()?;
        let count = length
            .checked_sub(4)
            .ok_or_else(|| corrupt(format!("第 {} 行的长度无效: {}", y, length)))?;
        units.resize(count as usize, 0);
        reader.read_exact(&mut units)?;
        decode_row(&units, plane, y, bbox.left as u32, back, |count| count as usize)?;
    }
    Ok(())
}

/// RLE16 编码
pub fn encode_rle16<W: Write>(
    writer: &mut W,
    plane: &Plane<u16>,
    bbox: &BoundingBox,
    back: u16,
) -> Result<()> {
    if bbox.is_empty() {
        return Ok(());
    }
    let mut units = Vec::new();
    for y in bbox.rows() {
        units.clear();
        let row = &plane.row(y)[bbox.left as usize..=bbox.right as usize];
        encode_row(row, back, MAX_RUN_16, |count| (2 * count) as u16, &mut units);
        writer.write_u32::<LittleEndian>(2 * units.len() as u32 + 4)?;
        if units.len() % 2 == 1 {
            units.push(back);
        }
        for unit in &units {
            writer.write_u16::<LittleEndian>(*unit)?;
        }
    }
    Ok(())
}

/// RLE16 解码
pub fn decode_rle16<R: Read>(
    reader: &mut R,
    plane: &mut Plane<u16>,
    bbox: &BoundingBox,
    back: u16,
) -> Result<()> {
    plane.fill(back);
    if bbox.is_empty() {
        return Ok(());
    }
    let mut units = Vec::new();
    for y in bbox.rows() {
        let length = reader.read_u32::<LittleEndian>()?;
        let count = length
            .checked_sub(4)
            .ok_or_else(|| corrupt(format!("第 {} 行的长度无效: {}", y, length)))?
            / 2;
        units.clear();
        for _ in 0..count {
            units.push(reader.read_u16::<LittleEndian>()?);
        }
        if count % 2 == 1 {
            reader.read_u16::<LittleEndian>()?;
        }
        // 计数按有符号 2n 存储，奇数向上取整
        decode_row(&units, plane, y, bbox.left as u32, back, |count| {
            let count = count as i16;
            if count > 0 { (count as usize).div_ceil(2) } else { 0 }
        })?;
    }
    Ok(())
}

/// 遮罩格式的补齐行宽
pub fn masked_row_width(width: i32) -> i32 {
    if width <= 0 {
        0
    } else if width >= 0x20 {
        (width + 7) / 8 * 8
    } else {
        (width + 3) / 4 * 4
    }
}

/// Masked8 编码
///
/// 行尾的补齐宽度计入背景段，背景段跨行延续，直到遇到前景像素或最后一行结束才写出。
pub fn encode_masked8<W: Write>(
    writer: &mut W,
    plane: &Plane<u8>,
    bbox: &BoundingBox,
    back: u8,
) -> Result<()> {
    if bbox.is_empty() {
        return Ok(());
    }
    let padding = (masked_row_width(bbox.width()) - bbox.width()) as usize;
    let mut run = 0usize;
    let flush = |run: &mut usize, writer: &mut W| -> Result<()> {
        while *run > 0 {
            let count = (*run).min(MAX_RUN_8);
            writer.write_all(&[back, count as u8])?;
            *run -= count;
        }
        Ok(())
    };

    for y in bbox.rows() {
        for x in bbox.columns() {
            let value = plane.get(x, y);
            if value == back {
                run += 1;
            } else {
                flush(&mut run, writer)?;
                writer.write_u8(value)?;
            }
        }
        run += padding;
    }
    flush(&mut run, writer)
}

/// Masked8 解码
///
/// 每行遍历补齐后的宽度，读满 `data_size` 字节即停止，剩余像素保持背景。
pub fn decode_masked8<R: Read>(
    reader: &mut R,
    plane: &mut Plane<u8>,
    bbox: &BoundingBox,
    back: u8,
    data_size: usize,
) -> Result<()> {
    plane.fill(back);
    if bbox.is_empty() || data_size == 0 {
        return Ok(());
    }
    let row_width = masked_row_width(bbox.width());
    let left = bbox.left as u32;
    let mut pending = 0usize;
    let mut bytes_read = 0usize;

    'rows: for y in bbox.rows() {
        let mut x = left;
        for _ in 0..row_width {
            if pending == 0 {
                let value = reader.read_u8()?;
                bytes_read += 1;
                if value != back {
                    if x >= plane.width() {
                        return Err(corrupt(format!("第 {} 行的像素落在补齐区域", y)));
                    }
                    plane.set(x, y, value);
                } else {
                    if bytes_read >= data_size {
                        break 'rows;
                    }
                    pending = (reader.read_u8()? as usize).saturating_sub(1);
                    bytes_read += 1;
                }
            } else {
                pending -= 1;
            }
            x += 1;
            if bytes_read >= data_size {
                break 'rows;
            }
        }
    }
    Ok(())
}

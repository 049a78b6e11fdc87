//! 未压缩像素读写
//!
//! 包围盒非空时只读写包围盒内的像素，否则读写整个可见区域。

use crate::error::Result;
use crate::image::bbox::BoundingBox;
use crate::image::bitmap::{Plane, Sample};
use byteorder::ReadBytesExt;
use std::io::{Read, Write};

fn region(plane_width: u32, plane_height: u32, bbox: &BoundingBox) -> BoundingBox {
    if bbox.is_empty() {
        BoundingBox::full(plane_width, plane_height)
    } else {
        *bbox
    }
}

/// 读取未压缩像素
pub fn read_plain<T: Sample, R: Read>(
    reader: &mut R,
    plane: &mut Plane<T>,
    bbox: &BoundingBox,
) -> Result<()> {
    let area = region(plane.width(), plane.height(), bbox);
    if area.is_empty() {
        return Ok(());
    }
    for y in area.rows() {
        for x in area.columns() {
            plane.set(x, y, T::read_from(reader)?);
        }
    }
    Ok(())
}

/// 写入未压缩像素
pub fn write_plain<T: Sample, W: Write>(
    writer: &mut W,
    plane: &Plane<T>,
    bbox: &BoundingBox,
) -> Result<()> {
    let area = region(plane.width(), plane.height(), bbox);
    if area.is_empty() {
        return Ok(());
    }
    for y in area.rows() {
        for x in area.columns() {
            plane.get(x, y).write_to(writer)?;
        }
    }
    Ok(())
}

/// 读取带遮罩的 16 位精灵：每行先是宽度个遮罩字节（丢弃），然后是宽度个 RGB565 像素
pub fn read_masked16<R: Read>(
    reader: &mut R,
    plane: &mut Plane<u16>,
    bbox: &BoundingBox,
) -> Result<()> {
    let area = region(plane.width(), plane.height(), bbox);
    if area.is_empty() {
        return Ok(());
    }
    let mut mask = vec![0u8; area.width() as usize];
    for y in area.rows() {
        reader.read_exact(&mut mask)?;
        for x in area.columns() {
            plane.set(x, y, u16::read_from(reader)?);
        }
    }
    Ok(())
}

/// 读取 alpha 遮罩：每个字节是一个像素的 alpha，颜色取背景 RGB
pub fn read_alpha_mask<R: Read>(
    reader: &mut R,
    plane: &mut Plane<u32>,
    bbox: &BoundingBox,
    back_rgb: u32,
) -> Result<()> {
    let area = region(plane.width(), plane.height(), bbox);
    if area.is_empty() {
        return Ok(());
    }
    for y in area.rows() {
        for x in area.columns() {
            let alpha = reader.read_u8()? as u32;
            plane.set(x, y, (alpha << 24) | (back_rgb & 0x00FF_FFFF));
        }
    }
    Ok(())
}

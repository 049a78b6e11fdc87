//! 图像表
//!
//! 顶层记录按图像编号排列，编号之间允许有空位。所有记录（包括组合图像的子图像）
//! 都存放在带代数的存储区中，记录之间通过 [`RecordId`] 引用。

use crate::error::{IlbError, Result};
use crate::formats::ContainerVariant;
use crate::formats::record::ImageRecord;
use crate::image::palette::PaletteTable;
use std::io::Read;
use tracing::{debug, warn};

/// 记录 id，释放后的 id 因代数不同而失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    record: Option<ImageRecord>,
}

/// 记录存储区
#[derive(Debug, Clone, Default)]
pub struct RecordArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, record: ImageRecord) -> RecordId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            RecordId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                record: Some(record),
            });
            RecordId {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&ImageRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut ImageRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// 释放记录及其全部子图像
    pub fn release(&mut self, id: RecordId) -> Option<ImageRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        for sub in &record.sub_images {
            self.release(*sub);
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 解析得到的记录树，插入图像表前使用
#[derive(Debug, Clone)]
pub(crate) struct RecordTree {
    pub record: ImageRecord,
    pub children: Vec<RecordTree>,
}

/// 图像表
#[derive(Debug, Clone)]
pub struct ImageTable {
    pub variant: ContainerVariant,
    pub palettes: PaletteTable,
    arena: RecordArena,
    entries: Vec<Option<RecordId>>,
}

impl ImageTable {
    pub fn new(variant: ContainerVariant) -> Self {
        Self {
            variant,
            palettes: PaletteTable::new(),
            arena: RecordArena::new(),
            entries: Vec::new(),
        }
    }

    /// 表长度（包含空位）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 有记录的顶层位置数
    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// 所有记录数（包括子图像）
    pub fn record_count(&self) -> usize {
        self.arena.len()
    }

    pub fn id_at(&self, index: usize) -> Option<RecordId> {
        self.entries.get(index).copied().flatten()
    }

    /// 按图像编号获取顶层记录
    pub fn get(&self, index: usize) -> Option<&ImageRecord> {
        self.id_at(index).and_then(|id| self.arena.get(id))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ImageRecord> {
        let id = self.id_at(index)?;
        self.arena.get_mut(id)
    }

    pub fn record(&self, id: RecordId) -> Option<&ImageRecord> {
        self.arena.get(id)
    }

    /// 子图像
    pub fn sub_images(&self, id: RecordId) -> impl Iterator<Item = &ImageRecord> + '_ {
        self.arena
            .get(id)
            .into_iter()
            .flat_map(|record| record.sub_images.iter())
            .filter_map(|sub| self.arena.get(*sub))
    }

    /// 按顺序遍历顶层记录 (图像编号, id, 记录)
    pub fn iter(&self) -> impl Iterator<Item = (usize, RecordId, &ImageRecord)> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            let id = (*entry)?;
            self.arena.get(id).map(|record| (index, id, record))
        })
    }

    /// 把记录放在指定编号处，必要时扩展表并留下空位
    pub fn place(&mut self, image_number: usize, mut record: ImageRecord) -> RecordId {
        if image_number >= self.entries.len() {
            self.entries.resize(image_number + 1, None);
        }
        if let Some(old) = self.entries[image_number].take() {
            warn!("图像编号 {} 重复，覆盖之前的记录", image_number);
            self.arena.release(old);
        }
        record.image_number = image_number as i32;
        let id = self.arena.allocate(record);
        self.entries[image_number] = Some(id);
        id
    }

    /// 插入解析得到的记录树
    pub(crate) fn place_tree(&mut self, image_number: usize, tree: RecordTree) -> RecordId {
        let RecordTree { record, children } = tree;
        let id = self.place(image_number, record);
        for child in children {
            self.attach_tree(id, child);
        }
        id
    }

    fn attach_tree(&mut self, parent: RecordId, tree: RecordTree) {
        let RecordTree { record, children } = tree;
        let Ok(id) = self.add_sub_image(parent, record) else {
            return;
        };
        for child in children {
            self.attach_tree(id, child);
        }
    }

    /// 在末尾添加记录，返回图像编号
    pub fn add(&mut self, record: ImageRecord) -> usize {
        let index = self.entries.len();
        self.place(index, record);
        index
    }

    /// 替换指定编号的记录
    pub fn replace(&mut self, index: usize, record: ImageRecord) -> Result<()> {
        if index >= self.entries.len() {
            return Err(IlbError::IndexOutOfBounds(index));
        }
        if let Some(old) = self.entries[index].take() {
            self.arena.release(old);
        }
        self.place(index, record);
        Ok(())
    }

    /// 在指定位置插入记录，后面的记录编号加一
    pub fn insert(&mut self, index: usize, mut record: ImageRecord) -> Result<()> {
        if index > self.entries.len() {
            return Err(IlbError::IndexOutOfBounds(index));
        }
        record.image_number = index as i32;
        let id = self.arena.allocate(record);
        self.entries.insert(index, Some(id));
        self.renumber();
        Ok(())
    }

    /// 删除指定位置的记录及其子图像，后面的记录编号减一。删除空位时返回 None
    pub fn remove(&mut self, index: usize) -> Result<Option<ImageRecord>> {
        if index >= self.entries.len() {
            return Err(IlbError::IndexOutOfBounds(index));
        }
        let entry = self.entries.remove(index);
        self.renumber();
        Ok(entry.and_then(|id| self.arena.release(id)))
    }

    /// 给组合图像添加子图像，子图像沿用父图像的编号
    pub fn add_sub_image(&mut self, parent: RecordId, mut record: ImageRecord) -> Result<RecordId> {
        let image_number = self
            .arena
            .get(parent)
            .map(|parent| parent.image_number)
            .ok_or(IlbError::IndexOutOfBounds(parent.index as usize))?;
        record.image_number = image_number;
        let id = self.arena.allocate(record);
        if let Some(parent) = self.arena.get_mut(parent) {
            parent.sub_images.push(id);
        }
        Ok(id)
    }

    /// 按位置重新编号，组合图像的子图像跟随父图像
    pub fn renumber(&mut self) {
        for index in 0..self.entries.len() {
            if let Some(id) = self.entries[index] {
                self.set_number(id, index as i32);
            }
        }
    }

    fn set_number(&mut self, id: RecordId, image_number: i32) {
        let Some(record) = self.arena.get_mut(id) else {
            return;
        };
        if record.image_number != image_number {
            debug!("图像编号 {} 改为 {}", record.image_number, image_number);
            record.image_number = image_number;
        }
        let subs = record.sub_images.clone();
        for sub in subs {
            self.set_number(sub, image_number);
        }
    }

    /// 为记录及其子图像解码像素，已有像素的记录跳过
    pub(crate) fn decode_pixels<R: Read>(&mut self, id: RecordId, reader: &mut R) -> Result<()> {
        let subs = {
            let Some(record) = self.arena.get_mut(id) else {
                return Ok(());
            };
            if record.pixels.is_none() {
                record.decode_pixels(reader, &self.palettes)?;
            }
            record.sub_images.clone()
        };
        for sub in subs {
            self.decode_pixels(sub, reader)?;
        }
        Ok(())
    }
}

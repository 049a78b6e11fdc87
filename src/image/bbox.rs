//! 包围盒计算
//!
//! 包围盒是包含所有非背景像素的最小矩形，坐标为闭区间。

use std::marker::PhantomData;

/// 包围盒 (上/左/右/下，均含边界)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub top: i32,
    pub left: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub const fn new(top: i32, left: i32, right: i32, bottom: i32) -> Self {
        Self {
            top,
            left,
            right,
            bottom,
        }
    }

    /// 空包围盒标记
    pub const fn empty() -> Self {
        Self::new(0, 0, -1, -1)
    }

    /// 覆盖整幅图像
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32 - 1, height as i32 - 1)
    }

    /// 由磁盘格式 (宽, 高, x 偏移, y 偏移) 创建
    pub fn from_extent(width: i32, height: i32, x_offset: i32, y_offset: i32) -> Self {
        Self::new(
            y_offset,
            x_offset,
            x_offset.saturating_add(width).saturating_sub(1),
            y_offset.saturating_add(height).saturating_sub(1),
        )
    }

    /// 转换为磁盘格式 (宽, 高, x 偏移, y 偏移)，空包围盒为全零
    pub fn extent(&self) -> (i32, i32, i32, i32) {
        if self.is_empty() {
            (0, 0, 0, 0)
        } else {
            (self.width(), self.height(), self.left, self.top)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right || self.top > self.bottom
    }

    pub fn width(&self) -> i32 {
        if self.is_empty() {
            0
        } else {
            self.right - self.left + 1
        }
    }

    pub fn height(&self) -> i32 {
        if self.is_empty() {
            0
        } else {
            self.bottom - self.top + 1
        }
    }

    /// 非空包围盒是否落在图像范围内
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.is_empty()
            || (self.left >= 0
                && self.top >= 0
                && self.right < width as i32
                && self.bottom < height as i32)
    }

    /// 行范围 (仅非空时有意义)
    pub fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.top as u32..=self.bottom as u32
    }

    /// 列范围 (仅非空时有意义)
    pub fn columns(&self) -> std::ops::RangeInclusive<u32> {
        self.left as u32..=self.right as u32
    }
}

/// 包围盒计算器，对任意可比较的像素类型通用
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxCalculator<T> {
    _marker: PhantomData<T>,
}

impl<T: PartialEq + Copy> BoundingBoxCalculator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// 计算 `values` 中不等于 `back` 的像素的包围盒
    ///
    /// 先自上而下找到第一个前景像素确定上边，再自下而上从右往左找到最后一个前景像素确定下边，
    /// 最后逐行扩展左右边界。全部为背景时返回空包围盒。
    pub fn calc(
        &self,
        values: &[T],
        back: T,
        stride: usize,
        width: usize,
        height: usize,
    ) -> BoundingBox {
        let row = |y: usize| &values[y * stride..y * stride + width];

        let Some((first_x, top)) = (0..height)
            .find_map(|y| row(y).iter().position(|v| *v != back).map(|x| (x, y)))
        else {
            return BoundingBox::empty();
        };

        let (last_x, bottom) = (top..height)
            .rev()
            .find_map(|y| row(y).iter().rposition(|v| *v != back).map(|x| (x, y)))
            .unwrap_or((first_x, top));

        let (mut left, mut right) = if last_x < first_x {
            (last_x, first_x)
        } else {
            (first_x, last_x)
        };

        for y in top..=bottom {
            let pixels = row(y);
            if let Some(x) = pixels.iter().position(|v| *v != back) {
                left = left.min(x);
            }
            if let Some(x) = pixels.iter().rposition(|v| *v != back) {
                right = right.max(x);
            }
        }

        BoundingBox::new(top as i32, left as i32, right as i32, bottom as i32)
    }
}

//! 记录模板和归一化选项
//!
//! 新建或导入图像时，所有未在文件中出现的字段都从 [`RecordTemplate`] 取默认值。

use crate::formats::record::{BlendMode, ClipHint, ImageType, LoadMode, ShowMode, SubType};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// 缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScalingType {
    #[default]
    None,
    /// 按比例缩放，比例精确到 0.1
    Proportional,
    /// 缩放到固定尺寸
    Fixed,
}

/// 缩放插值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    #[default]
    High,
    Gaussian,
    Lanczos,
}

impl Interpolation {
    pub fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
            Interpolation::High => FilterType::CatmullRom,
            Interpolation::Gaussian => FilterType::Gaussian,
            Interpolation::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// 写入前的缩放/透明处理选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    pub scaling: ScalingType,
    /// 按比例缩放时的比例
    pub scaling_factor: f32,
    /// 固定缩放时的目标尺寸
    pub scale_to: (u32, u32),
    pub interpolation: Interpolation,
    /// 是否把半透明像素合并到背景色
    pub drop_transparent: bool,
    /// alpha 低于该值的像素视为透明
    pub drop_threshold: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            scaling: ScalingType::None,
            scaling_factor: 1.0,
            scale_to: (0, 0),
            interpolation: Interpolation::High,
            drop_transparent: false,
            drop_threshold: 16,
        }
    }
}

impl NormalizeOptions {
    /// 设置缩放方式，不按比例缩放时比例重置为 1.0
    pub fn set_scaling(&mut self, scaling: ScalingType) {
        self.scaling = scaling;
        if scaling != ScalingType::Proportional {
            self.scaling_factor = 1.0;
        }
    }
}

/// 新记录的默认字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordTemplate {
    pub image_type: ImageType,
    pub sub_type: SubType,
    pub load_mode: LoadMode,
    pub show_mode: ShowMode,
    pub blend_mode: BlendMode,
    pub blend_value: i32,
    pub clip_hint: ClipHint,
    /// 写入时背景色 (RGB888)
    pub resized_background: u32,
    pub normalize: NormalizeOptions,
}

impl Default for RecordTemplate {
    fn default() -> Self {
        Self {
            image_type: ImageType::Rle8,
            sub_type: SubType::Format3,
            load_mode: LoadMode::WhenUsed,
            show_mode: ShowMode::Opaque,
            blend_mode: BlendMode::Alpha,
            blend_value: 0,
            clip_hint: ClipHint::None,
            resized_background: 0,
            normalize: NormalizeOptions::default(),
        }
    }
}

impl RecordTemplate {
    /// 以指定图像类型为基础的模板
    pub fn with_type(image_type: ImageType) -> Self {
        Self {
            image_type,
            ..Self::default()
        }
    }
}

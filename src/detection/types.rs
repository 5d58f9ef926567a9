// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测与跟踪数据结构定义
//! Data structures shared by detection and tracking

use serde::Serialize;

// ========== 公共常量 ==========

/// COCO 行人类别ID
pub const PERSON_CLASS_ID: u32 = 0;

/// 行人标签
pub const PERSON_LABEL: &str = "person";

/// COCO 类别名称 (用于非行人类别的日志输出)
const COCO_NAMES: [&str; 10] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
];

pub fn class_name(class_id: u32) -> &'static str {
    COCO_NAMES
        .get(class_id as usize)
        .copied()
        .unwrap_or("unknown")
}

// ========== 数据结构 ==========

/// 图像尺寸
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &image::RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// 检测框 (Detection bounding box, 检测分辨率像素坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    /// [l, t, r, b]
    pub fn ltrb(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// [x, y, w, h] (左上角 + 宽高)
    pub fn tlwh(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2 - self.x1, self.y2 - self.y1]
    }

    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// 跟踪框来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    /// 跟踪器已确认的轨迹
    Confirmed,
    /// 由原始检测补充的临时ID
    Fallback,
}

/// 跟踪结果框 (box, track_id, class_id)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub track_id: u32,
    pub class_id: u32,
    pub origin: TrackOrigin,
}

impl TrackBox {
    pub fn ltrb(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// 从检测分辨率映射到输出分辨率
    pub fn scaled(&self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x1: self.x1 * scale_x,
            y1: self.y1 * scale_y,
            x2: self.x2 * scale_x,
            y2: self.y2 * scale_y,
            ..self.clone()
        }
    }

    /// 按图像尺寸归一化到 [0, 1]
    pub fn normalized(&self, size: ImageSize) -> [f32; 4] {
        let w = size.width.max(1) as f32;
        let h = size.height.max(1) as f32;
        [self.x1 / w, self.y1 / h, self.x2 / w, self.y2 / h]
    }
}

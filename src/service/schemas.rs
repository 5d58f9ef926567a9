// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 请求/响应数据结构 (JSON)

use serde::{Deserialize, Serialize};

use crate::detection::{Detection, ImageSize, TrackBox, PERSON_LABEL};

/// 跟踪框 (坐标按输出图像尺寸归一化)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub id: u32,
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DetectionBox {
    pub fn from_track(track: &TrackBox, confidence: f32, size: ImageSize) -> Self {
        let [x1, y1, x2, y2] = track.normalized(size);
        Self {
            id: track.track_id,
            label: PERSON_LABEL.to_string(),
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub results: Vec<DetectionBox>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub frames: Vec<Vec<DetectionBox>>,
}

/// `/ws/track` 中的单个检测框 (id 为检测序号)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveBox {
    pub id: usize,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
}

impl LiveBox {
    pub fn from_detection(index: usize, det: &Detection, size: ImageSize) -> Self {
        let w = size.width.max(1) as f32;
        let h = size.height.max(1) as f32;
        Self {
            id: index,
            x1: det.x1 / w,
            y1: det.y1 / h,
            x2: det.x2 / w,
            y2: det.y2 / h,
            conf: det.confidence,
        }
    }
}

/// `/ws/batch` 中的单个跟踪框
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchBox {
    pub id: u32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BatchBox {
    pub fn from_track(track: &TrackBox, size: ImageSize) -> Self {
        let [x1, y1, x2, y2] = track.normalized(size);
        Self {
            id: track.track_id,
            x1,
            y1,
            x2,
            y2,
        }
    }
}

/// 实时连接的出站消息
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveReply {
    Track {
        boxes: Vec<LiveBox>,
    },
    BatchResults {
        results: Vec<Vec<BatchBox>>,
        timestamp: serde_json::Value,
    },
}

/// 实时连接的入站 JSON 消息
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveRequest {
    BatchFrames {
        frames: Vec<String>,
        #[serde(default)]
        timestamp: serde_json::Value,
    },
}

/// 错误响应体
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 集成测试公共工具: 脚本化检测器与合成视频
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use person_track_rs::detection::{Detection, Detector, DetectorError};
use person_track_rs::pipeline::mjpeg::encode_sequence;

/// 每次调用返回同一组检测, 可在指定调用序号上失败
pub struct ScriptedDetector {
    pub detections: Vec<Detection>,
    pub fail_on: Option<usize>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail_on: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(DetectorError::Inference("scripted failure".into()));
        }
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn person(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
    Detection::new(x1, y1, x2, y2, conf, 0)
}

/// 合成 MJPEG 视频
pub fn synthetic_video(frames: usize, width: u32, height: u32) -> Vec<u8> {
    let frames: Vec<RgbImage> = (0..frames)
        .map(|i| {
            RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, (i * 9 % 256) as u8])
            })
        })
        .collect();
    encode_sequence(&frames, 85).expect("encode synthetic video")
}

/// 纯色 MJPEG 视频 (便于检查绘制结果)
pub fn plain_video(frames: usize, width: u32, height: u32) -> Vec<u8> {
    let frames: Vec<RgbImage> = (0..frames)
        .map(|_| RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
        .collect();
    encode_sequence(&frames, 90).expect("encode plain video")
}

/// 明显偏绿的像素数 (检测框颜色)
pub fn green_pixels(frame: &RgbImage) -> usize {
    frame
        .pixels()
        .filter(|p| {
            let [r, g, b] = p.0;
            g as i32 > r as i32 + 60 && g as i32 > b as i32 + 60
        })
        .count()
}

/// 每个测试独立的临时目录
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("person-track-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

pub fn dir_is_empty(dir: &PathBuf) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

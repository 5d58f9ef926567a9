// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器接口 (Detector)
//! 职责: RGB 图像 → 检测框列表

use std::sync::{Arc, Mutex};

use image::RgbImage;

use super::types::Detection;

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("inference engine error")]
    Inference(String),

    #[error("invalid model output shape: {0}")]
    OutputShape(String),

    #[error("detector lock poisoned")]
    Poisoned,
}

/// 目标检测器 Trait
pub trait Detector: Send {
    /// 单帧检测, 坐标为输入图像像素
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;

    /// 批量检测, 默认逐帧调用
    fn detect_batch(&mut self, images: &[RgbImage]) -> Result<Vec<Vec<Detection>>, DetectorError> {
        images.iter().map(|img| self.detect(img)).collect()
    }

    fn name(&self) -> &str {
        "detector"
    }
}

/// 多个任务共享的检测模型
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

pub fn shared(detector: impl Detector + 'static) -> SharedDetector {
    Arc::new(Mutex::new(Box::new(detector)))
}

/// 在共享检测器上运行一帧
pub fn run_shared(detector: &SharedDetector, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let mut guard = detector.lock().map_err(|_| DetectorError::Poisoned)?;
    guard.detect(image)
}

/// 在共享检测器上运行一批帧 (只加锁一次)
pub fn run_shared_batch(
    detector: &SharedDetector,
    images: &[RgbImage],
) -> Result<Vec<Vec<Detection>>, DetectorError> {
    let mut guard = detector.lock().map_err(|_| DetectorError::Poisoned)?;
    guard.detect_batch(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Detection>);

    impl Detector for Fixed {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_default_batch() {
        let mut d = Fixed(vec![Detection::new(0.0, 0.0, 10.0, 20.0, 0.9, 0)]);
        let frames = vec![RgbImage::new(4, 4), RgbImage::new(4, 4)];
        let out = d.detect_batch(&frames).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].len(), 1);
    }

    #[test]
    fn test_shared_detector() {
        let d = shared(Fixed(vec![]));
        assert!(run_shared(&d, &RgbImage::new(4, 4)).unwrap().is_empty());
        assert_eq!(run_shared_batch(&d, &[RgbImage::new(4, 4)]).unwrap().len(), 1);
    }
}

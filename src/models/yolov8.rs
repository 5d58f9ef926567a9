// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器
// 包含: 模型加载、letterbox 预处理、推理、后处理

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};

use super::{decode_yolov8, non_max_suppression, scale_wh};
use crate::config::DetectorSettings;
use crate::detection::{Detection, Detector, DetectorError};

impl From<ort::Error> for DetectorError {
    fn from(e: ort::Error) -> Self {
        // 原始错误只写日志
        tracing::error!(error = %e, "❌ ONNX Runtime error");
        DetectorError::Inference("onnx runtime".into())
    }
}

/// YOLOv8 检测器 (只输出行人)
pub struct YoloDetector {
    session: Session,
    input_name: String,
    width: u32,
    height: u32,
    conf: f32,
    iou: f32,
    person_class_id: u32,
}

impl YoloDetector {
    pub fn new(settings: &DetectorSettings) -> Result<Self, DetectorError> {
        let path = Path::new(&settings.model_path);
        if !path.exists() {
            return Err(DetectorError::Load(format!("model not found: {}", settings.model_path)));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());

        tracing::info!(
            "✅ 模型加载完成: {} (输入 {}, {}x{}, conf {:.2}, iou {:.2})",
            settings.model_path,
            input_name,
            settings.input_size,
            settings.input_size,
            settings.conf_threshold,
            settings.iou_threshold
        );

        Ok(Self {
            session,
            input_name,
            width: settings.input_size,
            height: settings.input_size,
            conf: settings.conf_threshold,
            iou: settings.iou_threshold,
            person_class_id: settings.person_class_id,
        })
    }

    /// letterbox: 等比缩放放在左上角, 其余填充 144/255
    fn preprocess(&self, image: &RgbImage) -> (Array<f32, IxDyn>, f32) {
        let mut ys = Array::ones((1, 3, self.height as usize, self.width as usize)).into_dyn();
        ys.fill(144.0 / 255.0);

        let (w0, h0) = image.dimensions();
        let (ratio, w_new, h_new) =
            scale_wh(w0 as f32, h0 as f32, self.width as f32, self.height as f32);
        let resized = DynamicImage::ImageRgb8(image.clone()).resize_exact(
            (w_new as u32).max(1),
            (h_new as u32).max(1),
            FilterType::Triangle,
        );

        for (x, y, rgb) in resized.pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b, _] = rgb.0;
            ys[[0, 0, y, x]] = (r as f32) / 255.0;
            ys[[0, 1, y, x]] = (g as f32) / 255.0;
            ys[[0, 2, y, x]] = (b as f32) / 255.0;
        }

        (ys, ratio)
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let t_pre = std::time::Instant::now();
        let (input, ratio) = self.preprocess(image);
        let pre = t_pre.elapsed();

        let t_run = std::time::Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;
        let output = outputs[0].try_extract_tensor::<f32>()?;
        let run = t_run.elapsed();

        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(DetectorError::OutputShape(format!("{:?}", shape)));
        }
        let (rows, anchors) = (shape[1], shape[2]);
        let preds: Vec<f32> = output.iter().take(rows * anchors).copied().collect();

        let t_post = std::time::Instant::now();
        let mut dets = decode_yolov8(
            &preds,
            anchors,
            rows - 4,
            ratio,
            self.conf,
            (image.width() as f32, image.height() as f32),
        );
        dets.retain(|d| d.class_id == self.person_class_id);
        non_max_suppression(&mut dets, self.iou);

        tracing::trace!(
            "[YOLOv8] pre {:?} | infer {:?} | post {:?} | {} persons",
            pre,
            run,
            t_post.elapsed(),
            dets.len()
        );
        Ok(dets)
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测模型 (Detection models)
//!
//! - 后处理: YOLOv8 输出解码 + NMS, 不依赖推理引擎
//! - YOLOv8: ONNX Runtime 推理 (需要 `onnx` 功能)
//!
//! YOLOv8 输出布局为 `[1, 4 + nc, anchors]`, 每个 anchor 一列:
//! 前 4 行是 cx, cy, w, h (letterbox 输入坐标), 其后是各类别分数.
use crate::detection::{compute_iou, Detection};

#[cfg(feature = "onnx")]
pub mod yolov8;

#[cfg(feature = "onnx")]
pub use yolov8::YoloDetector;

const CXYWH_OFFSET: usize = 4;

/// letterbox 缩放比例和缩放后尺寸
pub fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 解码 YOLOv8 输出 (单张图, 行优先 `[4 + nc, anchors]`)
///
/// 坐标除以 letterbox 比例映射回原图, 并裁剪到原图范围内.
pub fn decode_yolov8(
    preds: &[f32],
    anchors: usize,
    num_classes: usize,
    ratio: f32,
    conf_threshold: f32,
    original: (f32, f32),
) -> Vec<Detection> {
    let (width_original, height_original) = original;
    if anchors == 0 || num_classes == 0 || preds.len() < (CXYWH_OFFSET + num_classes) * anchors {
        return Vec::new();
    }
    let at = |row: usize, col: usize| preds[row * anchors + col];

    let mut out = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (0..num_classes)
            .map(|c| (c, at(CXYWH_OFFSET + c, i)))
            .fold((0, f32::MIN), |max, x| if x.1 > max.1 { x } else { max });

        if confidence < conf_threshold {
            continue;
        }

        let cx = at(0, i) / ratio;
        let cy = at(1, i) / ratio;
        let w = at(2, i) / ratio;
        let h = at(3, i) / ratio;
        let x1 = (cx - w / 2.).clamp(0.0, width_original);
        let y1 = (cy - h / 2.).clamp(0.0, height_original);
        let x2 = (cx + w / 2.).clamp(0.0, width_original);
        let y2 = (cy + h / 2.).clamp(0.0, height_original);

        out.push(Detection::new(x1, y1, x2, y2, confidence, class_id as u32));
    }
    out
}

/// 非极大值抑制 (按置信度降序, 同类框 IOU 超过阈值即丢弃)
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            let iou = compute_iou(&xs[prev_index].ltrb(), &xs[index].ltrb());
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造 `[4 + nc, anchors]` 输出
    fn output(cols: &[[f32; 6]]) -> Vec<f32> {
        let anchors = cols.len();
        let mut v = vec![0.0; 6 * anchors];
        for (i, col) in cols.iter().enumerate() {
            for (row, value) in col.iter().enumerate() {
                v[row * anchors + i] = *value;
            }
        }
        v
    }

    #[test]
    fn test_scale_wh() {
        let (r, w, h) = scale_wh(1280.0, 720.0, 640.0, 640.0);
        assert_eq!(r, 0.5);
        assert_eq!((w, h), (640.0, 360.0));
    }

    #[test]
    fn test_decode_threshold_and_ratio() {
        // cx, cy, w, h, person, car
        let preds = output(&[
            [100.0, 100.0, 40.0, 80.0, 0.9, 0.1],
            [300.0, 300.0, 40.0, 40.0, 0.1, 0.2],
            [50.0, 50.0, 20.0, 20.0, 0.05, 0.7],
        ]);
        let dets = decode_yolov8(&preds, 3, 2, 0.5, 0.4, (1280.0, 720.0));
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].ltrb(), [160.0, 120.0, 240.0, 280.0]);
        assert_eq!(dets[1].class_id, 1);
    }

    #[test]
    fn test_decode_clamps_to_image() {
        let preds = output(&[[5.0, 5.0, 20.0, 20.0, 0.9, 0.0]]);
        let dets = decode_yolov8(&preds, 1, 2, 1.0, 0.4, (100.0, 100.0));
        assert_eq!(dets[0].ltrb(), [0.0, 0.0, 15.0, 15.0]);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(decode_yolov8(&[0.0; 5], 1, 2, 1.0, 0.4, (10.0, 10.0)).is_empty());
    }

    #[test]
    fn test_nms() {
        let mut dets = vec![
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.8, 0),
            Detection::new(1.0, 1.0, 11.0, 11.0, 0.9, 0),
            Detection::new(1.0, 1.0, 11.0, 11.0, 0.7, 2),
            Detection::new(50.0, 50.0, 60.0, 60.0, 0.5, 0),
        ];
        non_max_suppression(&mut dets, 0.6);
        assert_eq!(dets.len(), 3);
        assert_eq!(dets[0].confidence, 0.9);
        assert!(dets.iter().any(|d| d.class_id == 2));
    }
}

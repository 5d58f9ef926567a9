// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 置信度回填: 按 IOU 把当帧检测分数关联回跟踪框

use super::types::Detection;

/// 置信度关联的最小 IOU (严格大于)
pub const CONFIDENCE_MATCH_IOU: f32 = 0.5;

/// 计算两个 [l, t, r, b] 框的IOU (Intersection over Union)
pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (a[2] - a[0]) * (a[3] - a[1]);
    let area2 = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area1 + area2 - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

/// 与跟踪框 IOU 最大的检测置信度, 最大 IOU 不超过阈值时返回 0.0
pub fn match_confidence(track_box: &[f32; 4], detections: &[Detection]) -> f32 {
    let mut best_iou = 0.0f32;
    let mut best_conf = 0.0f32;
    for det in detections {
        let iou = compute_iou(track_box, &det.ltrb());
        if iou > best_iou {
            best_iou = iou;
            best_conf = det.confidence;
        }
    }

    if best_iou > CONFIDENCE_MATCH_IOU {
        best_conf
    } else {
        0.0
    }
}

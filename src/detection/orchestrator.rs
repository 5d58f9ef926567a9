// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 跟踪编排 (Track orchestration)
//!
//! 每帧流程:
//! 1. 只保留行人检测并做几何过滤
//! 2. 转为 tlwh 送入跟踪器 (无检测也要调用, 让跟踪器推进预测)
//! 3. 已确认轨迹: 平滑 → 裁剪到画面内 → 再次过滤
//! 4. 聚焦模式只保留指定ID
//! 5. 轨迹数少于有效检测数时, 用未被覆盖的原始检测补充临时ID
//! 6. 平滑状态裁剪到本帧输出的ID集合

use std::collections::HashSet;

use image::RgbImage;

use super::confidence::compute_iou;
use super::session::TrackingSession;
use super::tracker::{TrackerError, TrackerInput};
use super::types::{class_name, Detection, ImageSize, TrackBox, TrackOrigin, PERSON_CLASS_ID, PERSON_LABEL};
use super::validator::BoxValidator;
use crate::config::{FallbackSettings, Settings};

#[derive(Clone, Debug)]
pub struct TrackOrchestrator {
    validator: BoxValidator,
    person_class_id: u32,
    /// 角点距离阈值 (两个轴都小于该值视为同一目标)
    proximity_px: f32,
    /// 与已输出框的 IOU 达到该值视为同一目标
    dedup_iou: f32,
}

impl TrackOrchestrator {
    pub fn new(validator: BoxValidator, fallback: &FallbackSettings) -> Self {
        Self {
            validator,
            person_class_id: PERSON_CLASS_ID,
            proximity_px: fallback.proximity_px,
            dedup_iou: fallback.iou_threshold,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut orchestrator = Self::new(BoxValidator::new(&settings.validator), &settings.fallback);
        orchestrator.person_class_id = settings.detector.person_class_id;
        orchestrator
    }

    /// 过滤出有效的行人检测, 保持输入顺序
    pub fn filter_detections<'a>(
        &self,
        detections: &'a [Detection],
        size: ImageSize,
    ) -> Vec<&'a Detection> {
        detections
            .iter()
            .filter(|d| {
                let keep = d.class_id == self.person_class_id;
                if !keep {
                    tracing::trace!(class = class_name(d.class_id), "non-person detection dropped");
                }
                keep
            })
            .filter(|d| self.validator.is_valid(d.ltrb(), Some(size)))
            .collect()
    }

    /// 处理一帧, 返回 (框, 轨迹ID, 类别) 列表
    ///
    /// 已确认轨迹在前, 补充框在后. 跟踪器错误直接返回给调用方.
    pub fn update(
        &self,
        session: &mut TrackingSession,
        detections: &[Detection],
        frame: &RgbImage,
        focus_id: Option<u32>,
        include_fallback: bool,
    ) -> Result<Vec<TrackBox>, TrackerError> {
        let size = ImageSize::of(frame);
        let filtered = self.filter_detections(detections, size);

        let inputs: Vec<TrackerInput> = filtered
            .iter()
            .map(|d| TrackerInput {
                tlwh: d.tlwh(),
                confidence: d.confidence,
                label: PERSON_LABEL,
            })
            .collect();

        let tracks = match session.tracker.update(&inputs, frame) {
            Ok(tracks) => tracks,
            Err(e) => {
                // 本帧没有输出, 平滑状态随之清空
                session.smoother.retain_active(&HashSet::new());
                return Err(e);
            }
        };

        let width = size.width as i32;
        let height = size.height as i32;
        let mut results: Vec<TrackBox> = Vec::with_capacity(tracks.len() + filtered.len());
        let mut confirmed_ids = HashSet::new();

        for track in tracks.iter().filter(|t| t.confirmed) {
            confirmed_ids.insert(track.id);

            let [l, t, r, b] = session.smoother.smooth(track.id, track.ltrb);

            // 裁剪到画面内, 不丢弃
            let l = l.min(width - 1).max(0);
            let t = t.min(height - 1).max(0);
            let r = r.min(width).max(l + 1);
            let b = b.min(height).max(t + 1);

            let ltrb = [l as f32, t as f32, r as f32, b as f32];
            if self.validator.is_valid(ltrb, Some(size)) {
                results.push(TrackBox {
                    x1: ltrb[0],
                    y1: ltrb[1],
                    x2: ltrb[2],
                    y2: ltrb[3],
                    track_id: track.id,
                    class_id: PERSON_CLASS_ID,
                    origin: TrackOrigin::Confirmed,
                });
            }
        }

        if let Some(focus) = focus_id {
            results.retain(|b| b.track_id == focus);
        }

        if include_fallback && results.len() < filtered.len() {
            let mut next_id = confirmed_ids.iter().copied().max().unwrap_or(0) + 1;
            for det in &filtered {
                if self.is_represented(det, &results) {
                    continue;
                }
                if !self.validator.is_valid(det.ltrb(), Some(size)) {
                    continue;
                }
                session.smoother.record_fallback(next_id, det.ltrb());
                results.push(TrackBox {
                    x1: det.x1,
                    y1: det.y1,
                    x2: det.x2,
                    y2: det.y2,
                    track_id: next_id,
                    class_id: PERSON_CLASS_ID,
                    origin: TrackOrigin::Fallback,
                });
                next_id += 1;
            }
        }

        let active: HashSet<u32> = results.iter().map(|b| b.track_id).collect();
        session.smoother.retain_active(&active);

        tracing::trace!(
            session = session.id(),
            detections = detections.len(),
            filtered = filtered.len(),
            tracks = results.len(),
            "frame orchestrated"
        );

        Ok(results)
    }

    /// 检测是否已被某个输出框覆盖 (角点邻近或 IOU 重叠)
    fn is_represented(&self, det: &Detection, results: &[TrackBox]) -> bool {
        let ltrb = det.ltrb();
        results.iter().any(|r| {
            ((det.x1 - r.x1).abs() < self.proximity_px && (det.y1 - r.y1).abs() < self.proximity_px)
                || compute_iou(&ltrb, &r.ltrb()) >= self.dedup_iou
        })
    }
}

impl Default for TrackOrchestrator {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

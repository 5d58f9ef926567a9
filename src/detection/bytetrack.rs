// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型, 不使用图像内容
//!
//! 轨迹命中 `n_init` 次后确认; 已确认轨迹在丢失期间继续以预测位置输出,
//! 连续丢失超过 `max_age` 帧后删除.

use image::RgbImage;

use super::confidence::compute_iou;
use super::tracker::{KalmanBoxFilter, TrackState, Tracker, TrackerError, TrackerInput};
use crate::config::TrackerSettings;

/// ByteTrack 跟踪对象
#[derive(Clone, Debug)]
struct ByteTrack {
    id: u32,
    kalman: KalmanBoxFilter,
    /// 命中次数
    hits: u32,
    /// 连续丢失帧数
    frames_lost: u32,
    confirmed: bool,
}

impl ByteTrack {
    fn new(id: u32, ltrb: &[f32; 4], q: f32, r: f32, n_init: u32) -> Self {
        Self {
            id,
            kalman: KalmanBoxFilter::new(ltrb, q, r),
            hits: 1,
            frames_lost: 0,
            confirmed: n_init <= 1,
        }
    }

    fn hit(&mut self, ltrb: &[f32; 4], n_init: u32) {
        self.kalman.update(ltrb);
        self.hits += 1;
        self.frames_lost = 0;
        if self.hits >= n_init {
            self.confirmed = true;
        }
    }

    fn state(&self) -> TrackState {
        TrackState {
            id: self.id,
            ltrb: self.kalman.ltrb(),
            confirmed: self.confirmed,
        }
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<ByteTrack>,

    /// 下一个分配的ID
    next_id: u32,

    max_age: u32,
    n_init: u32,

    /// 高分检测阈值
    high_score_threshold: f32,

    /// 低分检测阈值 (用于救援)
    low_score_threshold: f32,

    high_iou_threshold: f32,
    low_iou_threshold: f32,

    kalman_q: f32,
    kalman_r: f32,
}

impl ByteTracker {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_age: settings.max_age,
            n_init: settings.n_init,
            high_score_threshold: settings.high_score_threshold,
            low_score_threshold: settings.low_score_threshold,
            high_iou_threshold: settings.high_iou_threshold,
            low_iou_threshold: settings.low_iou_threshold,
            kalman_q: settings.kalman_process_noise,
            kalman_r: settings.kalman_obs_noise,
        }
    }

    /// IOU 贪心匹配, 返回 (检测索引, 轨迹索引)
    fn match_detections_to_tracks(
        &self,
        detections: &[(usize, [f32; 4])],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if detections.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (local_det, (det_idx, ltrb)) in detections.iter().enumerate() {
            for (local_track, &track_idx) in track_indices.iter().enumerate() {
                let predicted = self.tracks[track_idx].kalman.ltrb();
                let iou = compute_iou(ltrb, &predicted);
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, *det_idx, local_det, track_idx, local_track));
                }
            }
        }

        // 按代价排序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; track_indices.len()];
        for (_, det_idx, local_det, track_idx, local_track) in candidates {
            if !used_det[local_det] && !used_track[local_track] {
                assignments.push((det_idx, track_idx));
                used_det[local_det] = true;
                used_track[local_track] = true;
            }
        }

        assignments
    }
}

impl Tracker for ByteTracker {
    fn update(
        &mut self,
        detections: &[TrackerInput],
        frame: &RgbImage,
    ) -> Result<Vec<TrackState>, TrackerError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackerError::EmptyFrame);
        }

        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.kalman.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.high_score_threshold {
                high_dets.push((idx, det.ltrb()));
            } else if det.confidence >= self.low_score_threshold {
                low_dets.push((idx, det.ltrb()));
            }
        }

        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        for (det_idx, track_idx) in
            self.match_detections_to_tracks(&high_dets, &all_tracks, self.high_iou_threshold)
        {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            let ltrb = detections[det_idx].ltrb();
            self.tracks[track_idx].hit(&ltrb, self.n_init);
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        for (det_idx, track_idx) in
            self.match_detections_to_tracks(&low_dets, &unmatched, self.low_iou_threshold)
        {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            let ltrb = detections[det_idx].ltrb();
            self.tracks[track_idx].hit(&ltrb, self.n_init);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track, matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                track.frames_lost += 1;
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for (det_idx, det) in detections.iter().enumerate() {
            if !matched_det[det_idx] && det.confidence >= self.high_score_threshold {
                let track = ByteTrack::new(
                    self.next_id,
                    &det.ltrb(),
                    self.kalman_q,
                    self.kalman_r,
                    self.n_init,
                );
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹, 未确认轨迹丢失即删除
        let max_age = self.max_age;
        self.tracks.retain(|t| {
            if t.confirmed {
                t.frames_lost <= max_age
            } else {
                t.frames_lost == 0
            }
        });

        Ok(self.tracks.iter().map(ByteTrack::state).collect())
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

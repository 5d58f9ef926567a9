// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 轨迹框指数平滑 (EMA)
//!
//! `smoothed = α·raw + (1-α)·previous`, 结果截断为整数像素.
//! 状态按轨迹ID保存, 每帧结束后裁剪到当帧输出的ID集合.

use std::collections::{HashMap, HashSet};

use super::types::TrackOrigin;

#[derive(Clone, Debug)]
struct SmoothEntry {
    ltrb: [i32; 4],
    origin: TrackOrigin,
}

/// 按轨迹ID的位置平滑器
#[derive(Clone, Debug)]
pub struct TrackSmoother {
    alpha: f32,
    state: HashMap<u32, SmoothEntry>,
}

impl TrackSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: HashMap::new(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// 平滑一个已确认轨迹的框
    ///
    /// 没有历史 (或历史来自补充框) 时原样返回截断后的输入.
    pub fn smooth(&mut self, track_id: u32, raw: [f32; 4]) -> [i32; 4] {
        let raw = raw.map(|v| v as i32);
        let smoothed = match self.state.get(&track_id) {
            Some(prev) if prev.origin == TrackOrigin::Confirmed => {
                let mut out = [0i32; 4];
                for i in 0..4 {
                    let v = self.alpha * raw[i] as f32 + (1.0 - self.alpha) * prev.ltrb[i] as f32;
                    out[i] = v as i32;
                }
                out
            }
            _ => raw,
        };
        self.state.insert(
            track_id,
            SmoothEntry {
                ltrb: smoothed,
                origin: TrackOrigin::Confirmed,
            },
        );
        smoothed
    }

    /// 登记补充框的ID, 使状态键集合与当帧输出一致
    pub fn record_fallback(&mut self, track_id: u32, ltrb: [f32; 4]) {
        self.state.insert(
            track_id,
            SmoothEntry {
                ltrb: ltrb.map(|v| v as i32),
                origin: TrackOrigin::Fallback,
            },
        );
    }

    /// 删除不在活跃集合中的状态
    pub fn retain_active(&mut self, active: &HashSet<u32>) {
        self.state.retain(|id, _| active.contains(id));
    }

    pub fn last_box(&self, track_id: u32) -> Option<[i32; 4]> {
        self.state.get(&track_id).map(|e| e.ltrb)
    }

    pub fn ids(&self) -> HashSet<u32> {
        self.state.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

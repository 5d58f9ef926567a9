// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多目标跟踪接口与公共组件
//! Tracker interface and shared components

use image::RgbImage;

// ========== 接口数据 ==========

/// 跟踪器输入 (左上角 + 宽高, 置信度, 标签)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerInput {
    pub tlwh: [f32; 4],
    pub confidence: f32,
    pub label: &'static str,
}

impl TrackerInput {
    pub fn ltrb(&self) -> [f32; 4] {
        let [x, y, w, h] = self.tlwh;
        [x, y, x + w, y + h]
    }
}

/// 跟踪器输出的单条轨迹状态
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    pub id: u32,
    pub ltrb: [f32; 4],
    pub confirmed: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("tracker update failed: {0}")]
    Update(String),

    #[error("tracker received an empty frame buffer")]
    EmptyFrame,
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
///
/// 每个会话持有独立实例, `update` 每帧调用一次 (即使没有检测),
/// 以便跟踪器推进运动预测.
pub trait Tracker: Send {
    /// 更新跟踪器
    ///
    /// # 参数
    /// - `detections`: 当前帧的检测 (tlwh)
    /// - `frame`: 当前帧图像 (外观特征跟踪器使用)
    ///
    /// # 返回
    /// 当前所有存活的轨迹 (含未确认)
    fn update(
        &mut self,
        detections: &[TrackerInput],
        frame: &RgbImage,
    ) -> Result<Vec<TrackState>, TrackerError>;

    /// 重置跟踪器 (清除所有轨迹, ID 重新计数)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器 (用于单个边界框的位置和尺寸平滑)
/// 状态向量: [x_center, y_center, width, height, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],

    /// 估计误差协方差 (简化为对角阵)
    p: [f32; 8],

    /// 过程噪声
    q: f32,

    /// 观测噪声
    r: f32,

    /// 速度衰减因子
    velocity_decay: f32,

    /// 静止阈值 (像素/帧)
    stationary_threshold: f32,

    stationary_count: u32,
}

impl KalmanBoxFilter {
    /// 创建新的卡尔曼滤波器
    ///
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (越大越平滑)
    pub fn new(ltrb: &[f32; 4], q: f32, r: f32) -> Self {
        let [cx, cy, w, h] = to_cxcywh(ltrb);
        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
            stationary_threshold: 2.0,
            stationary_count: 0,
        }
    }

    /// 预测下一帧状态 (匀速运动模型 + 速度衰减)
    pub fn predict(&mut self) {
        let speed = self.state[4].hypot(self.state[5]);
        let is_stationary = speed < self.stationary_threshold;

        let (pos_decay, size_decay) = if is_stationary {
            self.stationary_count += 1;
            // 连续静止3帧后大幅衰减速度
            let d = if self.stationary_count > 3 {
                0.7
            } else {
                self.velocity_decay
            };
            (d, d)
        } else {
            self.stationary_count = 0;
            (self.velocity_decay, 0.98)
        };
        self.state[4] *= pos_decay;
        self.state[5] *= pos_decay;
        self.state[6] *= size_decay;
        self.state[7] *= size_decay;

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        // 尺寸不能塌缩
        self.state[2] = self.state[2].max(1.0);
        self.state[3] = self.state[3].max(1.0);

        let q = if is_stationary { self.q * 0.5 } else { self.q };
        for p in self.p.iter_mut() {
            *p += q;
        }
    }

    /// 更新 (融合观测值, 自适应观测噪声)
    pub fn update(&mut self, ltrb: &[f32; 4]) {
        let obs = to_cxcywh(ltrb);
        let residual: [f32; 4] = std::array::from_fn(|i| obs[i] - self.state[i]);

        let residual_norm = residual[0].hypot(residual[1]);
        let r = if residual_norm < self.stationary_threshold {
            self.r * 0.3
        } else if residual_norm < 10.0 {
            self.r
        } else {
            self.r * 3.0
        };

        let velocity_gain = if residual_norm < self.stationary_threshold {
            0.3
        } else {
            1.0
        };

        for i in 0..4 {
            let k = self.p[i] / (self.p[i] + r);
            let kv = self.p[i + 4] / (self.p[i + 4] + r * 10.0);
            self.state[i] += k * residual[i];
            self.state[i + 4] += kv * residual[i] * velocity_gain;
            self.p[i] *= 1.0 - k;
            self.p[i + 4] *= 1.0 - kv;
        }

        if residual_norm >= self.stationary_threshold {
            self.stationary_count = 0;
        }
    }

    /// 当前状态框 [l, t, r, b]
    pub fn ltrb(&self) -> [f32; 4] {
        from_cxcywh(self.state[0], self.state[1], self.state[2], self.state[3])
    }

    /// 下一帧预测框 (用于匹配)
    #[cfg(test)]
    fn predicted_ltrb(&self) -> [f32; 4] {
        from_cxcywh(
            self.state[0] + self.state[4],
            self.state[1] + self.state[5],
            self.state[2] + self.state[6],
            self.state[3] + self.state[7],
        )
    }
}

fn to_cxcywh(ltrb: &[f32; 4]) -> [f32; 4] {
    [
        (ltrb[0] + ltrb[2]) / 2.0,
        (ltrb[1] + ltrb[3]) / 2.0,
        ltrb[2] - ltrb[0],
        ltrb[3] - ltrb[1],
    ]
}

fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let w = w.max(1.0);
    let h = h.max(1.0);
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kalman_initial_state() {
        let k = KalmanBoxFilter::new(&[10.0, 10.0, 50.0, 90.0], 0.1, 0.5);
        assert_eq!(k.ltrb(), [10.0, 10.0, 50.0, 90.0]);
        assert_eq!(k.predicted_ltrb(), [10.0, 10.0, 50.0, 90.0]);
    }

    #[test]
    fn test_kalman_follows_motion() {
        let mut k = KalmanBoxFilter::new(&[0.0, 0.0, 40.0, 80.0], 0.1, 0.5);
        for step in 1..=10 {
            k.predict();
            let x = step as f32 * 5.0;
            k.update(&[x, 0.0, x + 40.0, 80.0]);
        }
        let [l, _, r, _] = k.ltrb();
        assert!(l > 40.0 && l <= 52.0, "l = {}", l);
        assert!((r - l - 40.0).abs() < 2.0);
    }

    #[test]
    fn test_tracker_input_ltrb() {
        let input = TrackerInput {
            tlwh: [10.0, 10.0, 40.0, 80.0],
            confidence: 0.9,
            label: "person",
        };
        assert_eq!(input.ltrb(), [10.0, 10.0, 50.0, 90.0]);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 跟踪会话 (Tracking session)
//!
//! 一个视频、一个批次、一条实时连接或一次单图请求各自持有一个会话.
//! 会话独占一个跟踪器实例和一个平滑器, 二者总是一起重置.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbImage;

use super::bytetrack::ByteTracker;
use super::smoother::TrackSmoother;
use super::tracker::Tracker;
use crate::config::TrackerSettings;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// 跟踪器工厂, 每个会话调用一次
pub type TrackerFactory = Arc<dyn Fn() -> Box<dyn Tracker> + Send + Sync>;

/// 默认工厂: ByteTrack
pub fn bytetrack_factory(settings: &TrackerSettings) -> TrackerFactory {
    let settings = settings.clone();
    Arc::new(move || Box::new(ByteTracker::new(&settings)) as Box<dyn Tracker>)
}

pub struct TrackingSession {
    id: u64,
    pub(crate) tracker: Box<dyn Tracker>,
    pub(crate) smoother: TrackSmoother,
}

impl TrackingSession {
    pub fn new(tracker: Box<dyn Tracker>, smooth_alpha: f32) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut session = Self {
            id,
            tracker,
            smoother: TrackSmoother::new(smooth_alpha),
        };
        session.warmup();
        tracing::debug!(session = id, "tracking session opened");
        session
    }

    pub fn from_factory(factory: &TrackerFactory, smooth_alpha: f32) -> Self {
        Self::new(factory(), smooth_alpha)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 预热: 空检测 + 小尺寸黑帧, 减少首帧延迟
    fn warmup(&mut self) {
        let dummy = RgbImage::new(128, 128);
        if let Err(e) = self.tracker.update(&[], &dummy) {
            tracing::debug!(session = self.id, error = %e, "tracker warmup failed");
        }
        self.tracker.reset();
    }

    /// 清除全部轨迹和平滑状态
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.smoother.reset();
        tracing::debug!(session = self.id, "tracking session reset");
    }

    pub fn smoother(&self) -> &TrackSmoother {
        &self.smoother
    }

    pub fn track_count(&self) -> usize {
        self.tracker.track_count()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        tracing::debug!(session = self.id, "tracking session closed");
    }
}

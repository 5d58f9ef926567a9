// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 进度广播 (Progress fan-out)
//!
//! 订阅者各自持有发送端; 单个订阅者发送失败只记日志, 不影响其它订阅者.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::Error;

/// 视频处理进度事件
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "progress")]
pub struct ProgressEvent {
    /// 0.0 ~ 1.0
    pub progress: f64,
    #[serde(rename = "frame")]
    pub frame_index: u64,
    pub total_frames: u64,
    /// 已用时间 (秒)
    pub elapsed_time: f64,
    /// 剩余时间估计 (秒)
    pub remaining_time: f64,
    pub processed_frames: u64,
    pub unique_tracks: usize,
}

impl ProgressEvent {
    /// 按当前帧位置计算进度和剩余时间
    pub fn at(
        frame_index: u64,
        total_frames: u64,
        elapsed_time: f64,
        processed_frames: u64,
        unique_tracks: usize,
    ) -> Self {
        let progress = if total_frames > 0 {
            (frame_index as f64 / total_frames as f64).min(1.0)
        } else {
            0.0
        };
        let remaining_time = (elapsed_time / progress.max(0.01) - elapsed_time).max(0.0);
        Self {
            progress,
            frame_index,
            total_frames,
            elapsed_time,
            remaining_time,
            processed_frames,
            unique_tracks,
        }
    }

    /// 最终事件 (progress = 1.0)
    pub fn finished(
        total_frames: u64,
        elapsed_time: f64,
        processed_frames: u64,
        unique_tracks: usize,
    ) -> Self {
        Self {
            progress: 1.0,
            frame_index: total_frames,
            total_frames,
            elapsed_time,
            remaining_time: 0.0,
            processed_frames,
            unique_tracks,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 进度事件接收端
pub trait ProgressSink: Send {
    fn send(&mut self, event: &ProgressEvent) -> Result<(), Error>;
}

impl ProgressSink for crossbeam_channel::Sender<ProgressEvent> {
    fn send(&mut self, event: &ProgressEvent) -> Result<(), Error> {
        self.try_send(event.clone())
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

#[cfg(feature = "web")]
impl ProgressSink for tokio::sync::mpsc::Sender<ProgressEvent> {
    fn send(&mut self, event: &ProgressEvent) -> Result<(), Error> {
        self.try_send(event.clone())
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

pub type SubscriberId = u64;

/// 进度广播器
#[derive(Default)]
pub struct ProgressBroadcaster {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, Box<dyn ProgressSink>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册订阅者, 返回其ID
    pub fn register(&self, sink: impl ProgressSink + 'static) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.insert(id, Box::new(sink));
                tracing::debug!(subscriber = id, total = subs.len(), "progress subscriber added");
            }
            Err(_) => tracing::error!("❌ progress subscriber table poisoned"),
        }
        id
    }

    /// 移除订阅者, 返回是否存在
    pub fn unregister(&self, id: SubscriberId) -> bool {
        match self.subscribers.lock() {
            Ok(mut subs) => subs.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 向所有订阅者发送, 返回成功发送的数量
    pub fn broadcast(&self, event: &ProgressEvent) -> usize {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(_) => {
                tracing::error!("❌ progress subscriber table poisoned");
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, sink) in subs.iter_mut() {
            match sink.send(event) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(subscriber = *id, error = %e, "⚠️ progress send failed"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Broken;

    impl ProgressSink for Broken {
        fn send(&mut self, _event: &ProgressEvent) -> Result<(), Error> {
            Err(Error::Channel("closed".into()))
        }
    }

    #[test]
    fn test_event_json_shape() {
        let e = ProgressEvent::at(10, 100, 2.0, 10, 3);
        let v: serde_json::Value = serde_json::from_str(&e.to_json()).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["frame"], 10);
        assert_eq!(v["total_frames"], 100);
        assert_eq!(v["unique_tracks"], 3);
        assert!((v["progress"].as_f64().unwrap() - 0.1).abs() < 1e-9);
        assert!((v["remaining_time"].as_f64().unwrap() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_remaining_with_zero_progress() {
        let e = ProgressEvent::at(0, 100, 0.5, 0, 0);
        assert_eq!(e.progress, 0.0);
        assert!((e.remaining_time - 49.5).abs() < 1e-9);
    }

    #[test]
    fn test_failure_isolated() {
        let b = ProgressBroadcaster::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        b.register(Broken);
        b.register(tx);
        assert_eq!(b.broadcast(&ProgressEvent::finished(5, 1.0, 5, 1)), 1);
        assert_eq!(rx.try_recv().unwrap().progress, 1.0);
    }

    #[test]
    fn test_unregister() {
        let b = ProgressBroadcaster::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = b.register(tx);
        assert!(b.unregister(id));
        assert!(!b.unregister(id));
        assert_eq!(b.broadcast(&ProgressEvent::at(1, 2, 0.1, 1, 0)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_register() {
        let b = Arc::new(ProgressBroadcaster::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || {
                    let (tx, _rx) = crossbeam_channel::unbounded::<ProgressEvent>();
                    let id = b.register(tx);
                    b.unregister(id)
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(b.subscriber_count(), 0);
    }
}

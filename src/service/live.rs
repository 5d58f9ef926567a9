// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! WebSocket 实时模式
//!
//! - `/ws/track`: 每条二进制消息一帧, 只做检测, ID 为检测序号
//! - `/ws/batch`: base64 帧批次, 整个连接是一个跟踪会话

use std::sync::Arc;

use base64::Engine;

use super::schemas::{BatchBox, LiveBox, LiveReply, LiveRequest};
use super::TrackingService;
use crate::detection::detector::run_shared;
use crate::detection::{ImageSize, TrackingSession};
use crate::error::{Error, Result};

impl TrackingService {
    /// `/ws/track` 单帧: 无法解码的帧返回 `None` (跳过, 不回复)
    pub fn live_track(&self, bytes: &[u8]) -> Result<Option<LiveReply>> {
        let image = match self.decode_image(bytes) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(error = %e, "live frame skipped");
                return Ok(None);
            }
        };
        let size = ImageSize::of(&image);
        let detections = run_shared(self.detector(), &image)?;
        let boxes = detections
            .iter()
            .enumerate()
            .map(|(i, d)| LiveBox::from_detection(i, d, size))
            .collect();
        Ok(Some(LiveReply::Track { boxes }))
    }
}

/// `/ws/batch` 连接状态: 持有该连接的跟踪会话
pub struct LiveBatchSession {
    service: Arc<TrackingService>,
    session: TrackingSession,
    batches: u64,
}

impl LiveBatchSession {
    pub fn new(service: Arc<TrackingService>) -> Self {
        let session = service.new_session();
        tracing::info!(session = session.id(), "🔌 batch client connected");
        Self {
            service,
            session,
            batches: 0,
        }
    }

    /// 处理一条文本消息
    ///
    /// 没有可解码帧的批次返回 `None`; 消息格式错误返回 `Decode` 错误.
    pub fn handle_text(&mut self, text: &str) -> Result<Option<LiveReply>> {
        let request: LiveRequest =
            serde_json::from_str(text).map_err(|e| Error::decode("message", e))?;
        match request {
            LiveRequest::BatchFrames { frames, timestamp } => self.handle_frames(&frames, timestamp),
        }
    }

    /// 解码 base64 帧并按顺序跟踪
    pub fn handle_frames(
        &mut self,
        frames: &[String],
        timestamp: serde_json::Value,
    ) -> Result<Option<LiveReply>> {
        let engine = base64::engine::general_purpose::STANDARD;
        let images: Vec<_> = frames
            .iter()
            .filter_map(|f| engine.decode(f.as_bytes()).ok())
            .filter_map(|bytes| self.service.decode_image(&bytes).ok())
            .collect();
        if images.is_empty() {
            return Ok(None);
        }

        let mut results = Vec::with_capacity(images.len());
        for image in &images {
            let size = ImageSize::of(image);
            let detections = run_shared(self.service.detector(), image)?;
            let tracks = self.service.orchestrator().update(
                &mut self.session,
                &detections,
                image,
                None,
                true,
            )?;
            results.push(tracks.iter().map(|t| BatchBox::from_track(t, size)).collect());
        }

        self.batches += 1;
        tracing::debug!(
            session = self.session.id(),
            batch = self.batches,
            frames = images.len(),
            "batch processed"
        );
        Ok(Some(LiveReply::BatchResults { results, timestamp }))
    }
}

impl Drop for LiveBatchSession {
    fn drop(&mut self) {
        self.session.reset();
        tracing::info!(
            session = self.session.id(),
            batches = self.batches,
            "🔌 batch client disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::detection::detector::shared;
    use crate::detection::{Detection, Detector, DetectorError};
    use crate::pipeline::render::encode_jpeg;
    use image::{Rgb, RgbImage};

    struct Fixed(Vec<Detection>);

    impl Detector for Fixed {
        fn detect(&mut self, _image: &RgbImage) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn service() -> Arc<TrackingService> {
        Arc::new(TrackingService::new(
            Settings::default(),
            shared(Fixed(vec![Detection::new(10.0, 10.0, 50.0, 90.0, 0.8, 0)])),
        ))
    }

    fn frame_b64() -> String {
        let bytes = encode_jpeg(&RgbImage::from_pixel(100, 100, Rgb([50, 50, 50])), 90).unwrap();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_live_track_detection_only() {
        let svc = service();
        let bytes = encode_jpeg(&RgbImage::new(100, 100), 90).unwrap();
        let reply = svc.live_track(&bytes).unwrap().unwrap();
        let LiveReply::Track { boxes } = reply else {
            panic!("unexpected reply");
        };
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].id, 0);
        assert_eq!(boxes[0].conf, 0.8);
        assert!(svc.live_track(b"garbage").unwrap().is_none());
    }

    #[test]
    fn test_batch_message_keeps_ids_across_batches() {
        let mut live = LiveBatchSession::new(service());
        let msg = serde_json::json!({
            "type": "batch_frames",
            "frames": [frame_b64(), "!!not base64!!", frame_b64()],
            "timestamp": 42
        })
        .to_string();

        let Some(LiveReply::BatchResults { results, timestamp }) = live.handle_text(&msg).unwrap() else {
            panic!("expected batch results");
        };
        assert_eq!(timestamp, serde_json::json!(42));
        // 无效帧被跳过
        assert_eq!(results.len(), 2);
        let first_id = results[0][0].id;
        assert_eq!(results[1][0].id, first_id);

        let Some(LiveReply::BatchResults { results, .. }) = live.handle_text(&msg).unwrap() else {
            panic!("expected batch results");
        };
        assert_eq!(results[0][0].id, first_id);
    }

    #[test]
    fn test_batch_without_valid_frames_is_silent() {
        let mut live = LiveBatchSession::new(service());
        let msg = r#"{"type":"batch_frames","frames":["@@@"],"timestamp":1}"#;
        assert!(live.handle_text(msg).unwrap().is_none());
        assert!(live.handle_text("{\"type\":\"other\"}").is_err());
    }
}

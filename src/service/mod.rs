// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 请求处理服务 (Tracking service)
//!
//! 与传输层无关的端点实现, 每个请求/批次/连接各自创建跟踪会话:
//! - detect:        单图检测 + 跟踪, 归一化 JSON
//! - process_image: 单图检测, 返回绘制后的 JPEG
//! - process_video: 视频流水线, 返回分块输出
//! - detect_batch:  一个会话贯穿整批图像
//! - live:          WebSocket 实时模式
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::config::Settings;
use crate::detection::detector::{run_shared, run_shared_batch};
use crate::detection::{
    bytetrack_factory, match_confidence, Detection, ImageSize, SharedDetector, TrackerFactory,
    TrackOrchestrator, TrackingSession,
};
use crate::error::{Error, Result};
use crate::pipeline::render::encode_jpeg;
use crate::pipeline::resize::resize_if_needed;
use crate::pipeline::video::{PipelineReport, VideoJob, VideoPipeline};
use crate::pipeline::{default_backend, BoxRenderer, ChunkedArtifact, TempArtifact, VideoBackend};
use crate::progress::ProgressBroadcaster;

pub mod live;
pub mod schemas;

pub use live::LiveBatchSession;
pub use schemas::{BatchResponse, DetectionBox, DetectionResponse, ErrorBody, LiveReply};

const JPEG_QUALITY: u8 = 90;

/// `/process_image` 结果
#[derive(Clone, Debug)]
pub struct ImageOutput {
    pub jpeg: Vec<u8>,
    pub total_detections: usize,
    pub avg_confidence: f32,
    /// 检测耗时 (毫秒)
    pub processing_ms: u128,
}

impl ImageOutput {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Total-Detections", self.total_detections.to_string()),
            ("X-Avg-Confidence", format!("{:.2}", self.avg_confidence)),
            ("X-Processing-Time", self.processing_ms.to_string()),
        ]
    }
}

/// `/process_video` 结果: 统计 + 分块输出
pub struct VideoOutput {
    pub report: PipelineReport,
    pub chunks: ChunkedArtifact,
    pub content_type: &'static str,
}

impl VideoOutput {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let r = &self.report;
        vec![
            ("X-Total-Frames", r.total_frames.to_string()),
            ("X-Processed-Frames", r.processed_frames.to_string()),
            ("X-Total-Detections", r.unique_tracks().to_string()),
            ("X-Avg-Detections", format!("{:.2}", r.avg_detections())),
            (
                "X-Processing-Time",
                format!("{:.1}", r.processing_time.as_secs_f64()),
            ),
            ("X-Frame-Rate", format!("{:.1}", r.effective_fps())),
        ]
    }
}

pub struct TrackingService {
    settings: Settings,
    detector: SharedDetector,
    tracker_factory: TrackerFactory,
    orchestrator: TrackOrchestrator,
    renderer: BoxRenderer,
    progress: Arc<ProgressBroadcaster>,
    backend: Arc<dyn VideoBackend>,
}

impl TrackingService {
    /// 默认使用 ByteTrack 和 `pipeline::default_backend`
    pub fn new(settings: Settings, detector: SharedDetector) -> Self {
        let tracker_factory = bytetrack_factory(&settings.tracker);
        let orchestrator = TrackOrchestrator::from_settings(&settings);
        let renderer = BoxRenderer::from_font_path(settings.server.font_path.as_deref());
        if !renderer.has_font() {
            tracing::info!("🔤 未配置标签字体, 只绘制框");
        }
        Self {
            settings,
            detector,
            tracker_factory,
            orchestrator,
            renderer,
            progress: Arc::new(ProgressBroadcaster::new()),
            backend: default_backend(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_tracker_factory(mut self, factory: TrackerFactory) -> Self {
        self.tracker_factory = factory;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn progress(&self) -> &Arc<ProgressBroadcaster> {
        &self.progress
    }

    /// 新的跟踪会话 (独立的跟踪器和平滑器)
    pub fn new_session(&self) -> TrackingSession {
        TrackingSession::from_factory(&self.tracker_factory, self.settings.tracker.smooth_alpha)
    }

    fn temp_dir(&self) -> PathBuf {
        self.settings
            .server
            .temp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// 解码图像, 超过处理上限时等比缩小
    pub fn decode_image(&self, bytes: &[u8]) -> Result<RgbImage> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::decode("image", e))?
            .to_rgb8();
        let (w, h) = image.dimensions();
        let p = &self.settings.pipeline;
        let image = resize_if_needed(image, p.max_width, p.max_height)?;
        if image.dimensions() != (w, h) {
            tracing::debug!(
                "📏 Resizing image from {}x{} to {}x{}",
                w,
                h,
                image.width(),
                image.height()
            );
        }
        Ok(image)
    }

    /// 检测并限制数量
    fn detect_limited(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let mut detections = run_shared(&self.detector, image)?;
        let max = self.settings.pipeline.max_detections;
        if detections.len() > max {
            tracing::warn!("⚠️ Limiting detections from {} to {}", detections.len(), max);
            detections.truncate(max);
        }
        Ok(detections)
    }

    /// 一帧: 跟踪 + 置信度回填 + 归一化
    fn track_boxes(
        &self,
        session: &mut TrackingSession,
        image: &RgbImage,
        detections: &[Detection],
        focus_id: Option<u32>,
    ) -> Result<Vec<DetectionBox>> {
        let size = ImageSize::of(image);
        let tracks = self
            .orchestrator
            .update(session, detections, image, focus_id, true)?;
        Ok(tracks
            .iter()
            .map(|t| DetectionBox::from_track(t, match_confidence(&t.ltrb(), detections), size))
            .collect())
    }

    /// `/detect`
    pub fn detect(&self, bytes: &[u8], focus_id: Option<u32>) -> Result<DetectionResponse> {
        let image = self.decode_image(bytes)?;
        let detections = self.detect_limited(&image)?;
        tracing::info!(
            "📸 Received image {}x{}, 📦 {} detections",
            image.width(),
            image.height(),
            detections.len()
        );

        let mut session = self.new_session();
        let results = self.track_boxes(&mut session, &image, &detections, focus_id)?;
        tracing::info!("✅ Processed image with {} tracked detections", results.len());
        Ok(DetectionResponse { results })
    }

    /// `/process_image`: 只检测, 绘制行人框和置信度
    pub fn process_image(&self, bytes: &[u8]) -> Result<ImageOutput> {
        let mut image = self.decode_image(bytes)?;

        let start = Instant::now();
        let detections = run_shared(&self.detector, &image)?;
        let processing_ms = start.elapsed().as_millis();

        let total_detections = detections.len();
        let avg_confidence = if total_detections > 0 {
            detections.iter().map(|d| d.confidence).sum::<f32>() / total_detections as f32
        } else {
            0.0
        };
        tracing::info!(
            "Processing time: {}ms, Detections: {}",
            processing_ms,
            total_detections
        );

        for det in detections.iter().filter(|d| d.is_person()) {
            self.renderer
                .draw_box(&mut image, det.ltrb(), &format!("person {:.2}", det.confidence));
        }

        Ok(ImageOutput {
            jpeg: encode_jpeg(&image, JPEG_QUALITY)?,
            total_detections,
            avg_confidence,
            processing_ms,
        })
    }

    /// `/process_video`
    ///
    /// 阻塞调用, 应在工作线程中运行. 输入临时文件在返回前删除,
    /// 输出文件随 `ChunkedArtifact` 交付, 最后一块读出后删除.
    pub fn process_video(
        &self,
        bytes: &[u8],
        skip_frames: u32,
        full_resolution: bool,
        cancel: Arc<AtomicBool>,
    ) -> Result<VideoOutput> {
        if bytes.is_empty() {
            return Err(Error::decode("video", "empty upload"));
        }
        let dir = self.temp_dir();
        let suffix = self.backend.output_suffix();
        let input = TempArtifact::new_in(&dir, "input", suffix);
        std::fs::write(input.path(), bytes)?;
        let output = TempArtifact::new_in(&dir, "output", suffix);

        let job = VideoJob::new(
            input.path().to_path_buf(),
            output.path().to_path_buf(),
            skip_frames,
            full_resolution,
        )
        .with_timeout(self.settings.pipeline.job_timeout())
        .with_cancel(cancel);

        let mut session = self.new_session();
        let mut pipeline = VideoPipeline::new(
            &self.settings.pipeline,
            &self.orchestrator,
            &self.detector,
            &self.renderer,
            &self.progress,
        );
        let report = pipeline.run(self.backend.as_ref(), &job, &mut session)?;
        drop(input);

        let chunks = pipeline.stream(output)?;
        Ok(VideoOutput {
            report,
            chunks,
            content_type: self.backend.content_type(),
        })
    }

    /// `/detect_batch`: 一个会话按顺序处理整批图像
    pub fn detect_batch(&self, files: &[(String, Vec<u8>)]) -> Result<BatchResponse> {
        let images = files
            .iter()
            .map(|(name, bytes)| {
                self.decode_image(bytes).map_err(|e| match e {
                    Error::Decode { reason, .. } => Error::decode(format!("image from {}", name), reason),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("📸 Processing batch of {} images", images.len());

        let batch_dets = run_shared_batch(&self.detector, &images)?;

        let mut session = self.new_session();
        let mut frames = Vec::with_capacity(images.len());
        for (i, (image, dets)) in images.iter().zip(&batch_dets).enumerate() {
            let boxes = self.track_boxes(&mut session, image, dets, None)?;
            tracing::debug!("Frame {}: {} tracked objects", i, boxes.len());
            frames.push(boxes);
        }
        Ok(BatchResponse { frames })
    }

    pub(crate) fn detector(&self) -> &SharedDetector {
        &self.detector
    }

    pub(crate) fn orchestrator(&self) -> &TrackOrchestrator {
        &self.orchestrator
    }
}

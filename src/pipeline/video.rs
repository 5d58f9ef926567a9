// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频处理状态机
//!
//! Idle → Opened → Processing → Finalizing → Streaming → Done,
//! 任何阶段失败进入 Error. 每个退出路径都会释放解码/编码句柄并重置会话.

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;

use super::artifact::{ChunkedArtifact, TempArtifact};
use super::render::BoxRenderer;
use super::resize::{resize_rgb, ResolutionPlan};
use super::{FrameSink, FrameSource, VideoBackend};
use crate::config::PipelineSettings;
use crate::detection::detector::run_shared;
use crate::detection::{ImageSize, SharedDetector, TrackBox, TrackOrchestrator, TrackingSession};
use crate::error::{Error, Result};
use crate::progress::{ProgressBroadcaster, ProgressEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opened,
    Processing,
    Finalizing,
    Streaming,
    Done,
    Error,
}

/// 一个视频任务
#[derive(Clone, Debug)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// 跳帧数 (0-5), 每 `skip_frames + 1` 帧检测一次
    pub skip_frames: u32,
    pub full_resolution: bool,
    /// 消费方断开时置位
    pub cancel: Arc<AtomicBool>,
    pub deadline: Option<Instant>,
    /// 截止时间对应的时长 (用于错误信息)
    pub timeout: Duration,
}

impl VideoJob {
    pub fn new(input: PathBuf, output: PathBuf, skip_frames: u32, full_resolution: bool) -> Self {
        Self {
            input,
            output,
            skip_frames,
            full_resolution,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn check(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(self.timeout));
            }
        }
        Ok(())
    }
}

/// 处理统计
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    /// 容器报告的帧数 (为 0 时使用实际读取帧数)
    pub total_frames: u64,
    pub written_frames: u64,
    pub processed_frames: u64,
    pub unique_track_ids: HashSet<u32>,
    pub processing_time: Duration,
    /// 检测/跟踪失败后以空结果替代的帧数
    pub delegate_failures: u64,
    pub output_size: Option<ImageSize>,
    pub output_bytes: u64,
}

impl PipelineReport {
    pub fn unique_tracks(&self) -> usize {
        self.unique_track_ids.len()
    }

    pub fn avg_detections(&self) -> f64 {
        if self.processed_frames > 0 {
            self.unique_track_ids.len() as f64 / self.processed_frames as f64
        } else {
            0.0
        }
    }

    pub fn effective_fps(&self) -> f64 {
        let secs = self.processing_time.as_secs_f64();
        if secs > 0.0 {
            self.processed_frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// 视频流水线
pub struct VideoPipeline<'a> {
    settings: &'a PipelineSettings,
    orchestrator: &'a TrackOrchestrator,
    detector: &'a SharedDetector,
    renderer: &'a BoxRenderer,
    progress: &'a ProgressBroadcaster,
    state: PipelineState,
}

impl<'a> VideoPipeline<'a> {
    pub fn new(
        settings: &'a PipelineSettings,
        orchestrator: &'a TrackOrchestrator,
        detector: &'a SharedDetector,
        renderer: &'a BoxRenderer,
        progress: &'a ProgressBroadcaster,
    ) -> Self {
        Self {
            settings,
            orchestrator,
            detector,
            renderer,
            progress,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    /// 处理整个视频, 写入 `job.output`
    ///
    /// 无论成功与否都会重置会话的跟踪器和平滑器.
    pub fn run(
        &mut self,
        backend: &dyn VideoBackend,
        job: &VideoJob,
        session: &mut TrackingSession,
    ) -> Result<PipelineReport> {
        let result = self.run_inner(backend, job, session);
        session.reset();
        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                self.transition(PipelineState::Error);
                tracing::error!(error = %e, "❌ 视频处理失败");
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        backend: &dyn VideoBackend,
        job: &VideoJob,
        session: &mut TrackingSession,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let skip = job.skip_frames.min(self.settings.max_skip_frames);

        // ===== Opened =====
        let info = backend.probe(&job.input)?;
        if info.width == 0 || info.height == 0 {
            return Err(Error::Resource("Failed to open input video".into()));
        }
        let plan = ResolutionPlan::new(
            info.size(),
            job.full_resolution,
            (self.settings.max_width, self.settings.max_height),
            (self.settings.detection_width, self.settings.detection_height),
        );
        let (mut source, sink) = backend.open(&job.input, &job.output, &info, plan.output)?;
        self.transition(PipelineState::Opened);

        tracing::info!(
            "✅ 输入视频: {}x{} @ {:.1}fps, 共 {} 帧, 跳帧 {}",
            info.width,
            info.height,
            info.fps,
            info.total_frames,
            skip
        );
        tracing::info!(
            "✅ 输出分辨率: {}x{} | 检测分辨率: {}x{} (scale: {:.3}x, {:.3}y)",
            plan.output.width,
            plan.output.height,
            plan.detection.width,
            plan.detection.height,
            plan.scale_x,
            plan.scale_y
        );

        let first = source
            .next_frame()?
            .ok_or_else(|| Error::Resource("Failed to read first frame".into()))?;

        let mut report = PipelineReport {
            total_frames: info.total_frames,
            output_size: Some(plan.output),
            ..Default::default()
        };
        self.progress.broadcast(&ProgressEvent::at(0, info.total_frames, 0.0, 0, 0));

        // ===== Processing =====
        self.transition(PipelineState::Processing);
        let sink = self.process_frames(job, &plan, skip, first, source.as_mut(), sink, session, &mut report, start)?;
        drop(source);

        // ===== Finalizing =====
        self.transition(PipelineState::Finalizing);
        sink.finish()?;

        if report.total_frames == 0 {
            report.total_frames = report.written_frames;
        }
        report.processing_time = start.elapsed();

        let size = std::fs::metadata(&job.output)
            .map_err(|_| Error::Resource("Output video was not written".into()))?
            .len();
        report.output_bytes = size;
        if size < self.settings.min_output_bytes {
            return Err(Error::ArtifactTooSmall {
                size,
                min: self.settings.min_output_bytes,
            });
        }

        self.progress.broadcast(&ProgressEvent::finished(
            report.total_frames,
            report.processing_time.as_secs_f64(),
            report.processed_frames,
            report.unique_tracks(),
        ));

        tracing::info!(
            "✅ 视频处理完成: 写入 {} 帧, 检测 {} 帧, {} 个轨迹, {:.1}s, {} bytes",
            report.written_frames,
            report.processed_frames,
            report.unique_tracks(),
            report.processing_time.as_secs_f64(),
            size
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_frames(
        &mut self,
        job: &VideoJob,
        plan: &ResolutionPlan,
        skip: u32,
        first: RgbImage,
        source: &mut dyn FrameSource,
        mut sink: Box<dyn FrameSink>,
        session: &mut TrackingSession,
        report: &mut PipelineReport,
        start: Instant,
    ) -> Result<Box<dyn FrameSink>> {
        let mut frame_i: u64 = 0;
        let mut next = Some(first);

        while let Some(raw) = next.take() {
            job.check()?;

            let mut frame = if ImageSize::of(&raw) == plan.output {
                raw
            } else {
                resize_rgb(&raw, plan.output)?
            };

            if frame_i > 0 && frame_i % self.settings.progress_every.max(1) == 0 {
                self.progress.broadcast(&ProgressEvent::at(
                    frame_i,
                    report.total_frames,
                    start.elapsed().as_secs_f64(),
                    report.processed_frames,
                    report.unique_tracks(),
                ));
            }

            // 跳过的帧原样写出
            if frame_i % (skip as u64 + 1) == 0 {
                let tracks = self.track_frame(&frame, plan, session, report)?;
                for t in &tracks {
                    let mapped = t.scaled(plan.scale_x, plan.scale_y);
                    self.renderer
                        .draw_box(&mut frame, mapped.ltrb(), &format!("person {}", t.track_id));
                }
            }

            sink.write_frame(&frame)?;
            report.written_frames += 1;
            frame_i += 1;

            if frame_i % self.settings.stats_every.max(1) == 0 {
                let elapsed = start.elapsed().as_secs_f64();
                let fps = if elapsed > 0.0 {
                    report.processed_frames as f64 / elapsed
                } else {
                    0.0
                };
                tracing::info!(
                    "🎬 Frame {}/{} ({} processed, {} unique tracks, ~{:.1} FPS)",
                    frame_i,
                    report.total_frames,
                    report.processed_frames,
                    report.unique_tracks(),
                    fps
                );
            }

            next = source.next_frame()?;
        }

        Ok(sink)
    }

    /// 检测分辨率上运行检测 + 编排, 失败时本帧结果为空
    fn track_frame(
        &self,
        frame: &RgbImage,
        plan: &ResolutionPlan,
        session: &mut TrackingSession,
        report: &mut PipelineReport,
    ) -> Result<Vec<TrackBox>> {
        let det_img: Cow<RgbImage> = if plan.needs_detection_resize() {
            Cow::Owned(resize_rgb(frame, plan.detection)?)
        } else {
            Cow::Borrowed(frame)
        };

        let detections = match run_shared(self.detector, &det_img) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ 检测失败, 本帧使用空结果");
                report.delegate_failures += 1;
                Vec::new()
            }
        };
        report.processed_frames += 1;

        let tracks = match self
            .orchestrator
            .update(session, &detections, &det_img, None, true)
        {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ 跟踪失败, 本帧使用空结果");
                report.delegate_failures += 1;
                Vec::new()
            }
        };

        report
            .unique_track_ids
            .extend(tracks.iter().map(|t| t.track_id));
        Ok(tracks)
    }

    /// 交付输出文件: 转为分块读取, 最后一块后删除
    pub fn stream(&mut self, artifact: TempArtifact) -> Result<ChunkedArtifact> {
        self.transition(PipelineState::Streaming);
        match artifact.into_chunks(self.settings.chunk_size) {
            Ok(chunks) => {
                self.transition(PipelineState::Done);
                Ok(chunks)
            }
            Err(e) => {
                self.transition(PipelineState::Error);
                Err(e)
            }
        }
    }
}

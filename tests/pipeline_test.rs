// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频流水线集成测试 (MJPEG 后端 + ByteTrack + 脚本化检测器)

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{green_pixels, person, plain_video, scratch_dir, synthetic_video, ScriptedDetector};
use image::RgbImage;
use person_track_rs::config::Settings;
use person_track_rs::detection::detector::shared;
use person_track_rs::detection::{
    bytetrack_factory, TrackOrchestrator, TrackState, Tracker, TrackerError, TrackerInput, TrackingSession,
};
use person_track_rs::error::Error;
use person_track_rs::pipeline::mjpeg::{split_frames, MjpegBackend};
use person_track_rs::pipeline::{BoxRenderer, PipelineState, TempArtifact, VideoJob, VideoPipeline};
use person_track_rs::progress::{ProgressBroadcaster, ProgressEvent};

struct Fixture {
    settings: Settings,
    orchestrator: TrackOrchestrator,
    renderer: BoxRenderer,
    progress: ProgressBroadcaster,
    backend: MjpegBackend,
}

impl Fixture {
    fn new() -> Self {
        let settings = Settings::default();
        Self {
            orchestrator: TrackOrchestrator::from_settings(&settings),
            settings,
            renderer: BoxRenderer::new(None),
            progress: ProgressBroadcaster::new(),
            backend: MjpegBackend::default(),
        }
    }

    fn session(&self) -> TrackingSession {
        TrackingSession::from_factory(&bytetrack_factory(&self.settings.tracker), 1.0)
    }
}

fn job_files(frames: usize) -> (TempArtifact, TempArtifact) {
    let input = TempArtifact::write("test-input", ".mjpeg", &synthetic_video(frames, 200, 200)).unwrap();
    let output = TempArtifact::new("test-output", ".mjpeg");
    (input, output)
}

#[test]
fn test_ten_frames_no_skip() {
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![person(40.0, 40.0, 80.0, 140.0, 0.9)]));
    let (input, output) = job_files(10);
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    fx.progress.register(tx);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    assert_eq!(report.total_frames, 10);
    assert_eq!(report.written_frames, 10);
    assert_eq!(report.processed_frames, 10);
    assert_eq!(report.unique_tracks(), 1);
    assert_eq!(report.delegate_failures, 0);
    assert!((report.avg_detections() - 0.1).abs() < 1e-9);

    let written = std::fs::read(output.path()).unwrap();
    assert_eq!(split_frames(&written).unwrap().len(), 10);

    // 会话在结束时被重置
    assert_eq!(session.track_count(), 0);
    assert!(session.smoother().is_empty());

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert_eq!(events.first().map(|e| e.progress), Some(0.0));
    assert_eq!(events.last().map(|e| e.progress), Some(1.0));

    let chunks: Vec<Vec<u8>> = pipeline.stream(output).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(chunks.concat(), written);
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn test_skip_frames_processes_every_kth() {
    let fx = Fixture::new();
    let scripted = ScriptedDetector::new(vec![person(40.0, 40.0, 80.0, 140.0, 0.9)]);
    let calls = scripted.calls.clone();
    let detector = shared(scripted);
    let (input, output) = job_files(25);
    let job = VideoJob::new(input.path().into(), output.path().into(), 2, false);

    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    fx.progress.register(tx);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    // 帧 0, 3, 6, ..., 24
    assert_eq!(report.processed_frames, 9);
    assert_eq!(calls.load(Ordering::SeqCst), 9);
    assert_eq!(report.written_frames, 25);

    // 初始 + 第 10, 20 帧 + 结束
    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 4);
    assert_eq!(events[1].frame_index, 10);
    assert!((events[1].progress - 0.4).abs() < 1e-9);
    assert_eq!(events[3].processed_frames, 9);
}

#[test]
fn test_skip_frames_clamped_to_five() {
    let fx = Fixture::new();
    let scripted = ScriptedDetector::new(vec![]);
    let calls = scripted.calls.clone();
    let detector = shared(scripted);
    let (input, output) = job_files(12);
    let job = VideoJob::new(input.path().into(), output.path().into(), 9, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    // 每 6 帧一次: 0, 6
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.written_frames, 12);
}

#[test]
fn test_detector_failure_yields_empty_frame() {
    let fx = Fixture::new();
    let detector = shared(
        ScriptedDetector::new(vec![person(40.0, 40.0, 80.0, 140.0, 0.9)]).failing_on(3),
    );
    let (input, output) = job_files(10);
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    assert_eq!(report.delegate_failures, 1);
    assert_eq!(report.written_frames, 10);
    assert_eq!(report.processed_frames, 10);
    assert_eq!(report.unique_tracks(), 1);
}

#[test]
fn test_cancelled_job_stops() {
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![]));
    let (input, output) = job_files(10);
    let cancel = Arc::new(AtomicBool::new(true));
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false).with_cancel(cancel);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let err = pipeline.run(&fx.backend, &job, &mut session).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(pipeline.state(), PipelineState::Error);
}

#[test]
fn test_deadline_exceeded() {
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![]));
    let (input, output) = job_files(10);
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false)
        .with_timeout(Duration::ZERO);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let err = pipeline.run(&fx.backend, &job, &mut session).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(err.status_code(), 504);
}

#[test]
fn test_small_output_rejected() {
    let mut fx = Fixture::new();
    fx.settings.pipeline.min_output_bytes = u64::MAX;
    let detector = shared(ScriptedDetector::new(vec![]));
    let (input, output) = job_files(3);
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let err = pipeline.run(&fx.backend, &job, &mut session).unwrap_err();
    assert!(matches!(err, Error::ArtifactTooSmall { .. }));
    assert_eq!(err.status_code(), 500);
}

#[test]
fn test_large_video_is_bounded_and_rescaled() {
    let fx = Fixture::new();
    // 检测分辨率 384x216, 输出 640x360
    let detector = shared(ScriptedDetector::new(vec![person(100.0, 50.0, 140.0, 150.0, 0.9)]));
    let input = TempArtifact::write("test-input", ".mjpeg", &synthetic_video(3, 1280, 720)).unwrap();
    let output = TempArtifact::new("test-output", ".mjpeg");
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    let size = report.output_size.unwrap();
    assert_eq!((size.width, size.height), (640, 360));
    assert_eq!(report.written_frames, 3);
    assert_eq!(report.processed_frames, 3);
    assert_eq!(report.unique_tracks(), 1);
}

#[test]
fn test_garbage_input_is_decode_error() {
    let dir = scratch_dir("garbage");
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![]));
    let input = TempArtifact::new_in(&dir, "input", ".mjpeg");
    std::fs::write(input.path(), b"this is not a video").unwrap();
    let output = TempArtifact::new_in(&dir, "output", ".mjpeg");
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let err = pipeline.run(&fx.backend, &job, &mut session).unwrap_err();
    assert_eq!(err.status_code(), 400);
    drop((input, output));
    std::fs::remove_dir(&dir).unwrap();
}

/// 固定输出一条已确认轨迹, 在指定调用序号上失败
struct FlakyTracker {
    calls: usize,
    fail_on: usize,
}

impl Tracker for FlakyTracker {
    fn update(
        &mut self,
        _detections: &[TrackerInput],
        _frame: &RgbImage,
    ) -> Result<Vec<TrackState>, TrackerError> {
        let call = self.calls;
        self.calls += 1;
        if call == self.fail_on {
            return Err(TrackerError::Update("scripted failure".into()));
        }
        Ok(vec![TrackState {
            id: 1,
            ltrb: [40.0, 40.0, 80.0, 140.0],
            confirmed: true,
        }])
    }

    fn reset(&mut self) {
        self.calls = 0;
    }

    fn track_count(&self) -> usize {
        1
    }
}

fn written_frames(path: &std::path::Path) -> Vec<RgbImage> {
    let data = std::fs::read(path).unwrap();
    split_frames(&data)
        .unwrap()
        .into_iter()
        .map(|r| image::load_from_memory(&data[r]).unwrap().to_rgb8())
        .collect()
}

#[test]
fn test_skipped_frame_carries_no_boxes() {
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![person(40.0, 40.0, 80.0, 140.0, 0.9)]));
    let input = TempArtifact::write("test-input", ".mjpeg", &plain_video(4, 200, 200)).unwrap();
    let output = TempArtifact::new("test-output", ".mjpeg");
    let job = VideoJob::new(input.path().into(), output.path().into(), 1, false);

    let mut session = fx.session();
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    pipeline.run(&fx.backend, &job, &mut session).unwrap();

    let frames = written_frames(output.path());
    assert_eq!(frames.len(), 4);
    assert!(green_pixels(&frames[0]) > 0);
    assert_eq!(green_pixels(&frames[1]), 0);
    assert!(green_pixels(&frames[2]) > 0);
    assert_eq!(green_pixels(&frames[3]), 0);
}

#[test]
fn test_tracker_failure_frame_is_blank() {
    let fx = Fixture::new();
    let detector = shared(ScriptedDetector::new(vec![]));
    let input = TempArtifact::write("test-input", ".mjpeg", &plain_video(4, 200, 200)).unwrap();
    let output = TempArtifact::new("test-output", ".mjpeg");
    let job = VideoJob::new(input.path().into(), output.path().into(), 0, false);

    let mut session = TrackingSession::new(Box::new(FlakyTracker { calls: 0, fail_on: 2 }), 1.0);
    let mut pipeline = VideoPipeline::new(&fx.settings.pipeline, &fx.orchestrator, &detector, &fx.renderer, &fx.progress);
    let report = pipeline.run(&fx.backend, &job, &mut session).unwrap();

    assert_eq!(report.delegate_failures, 1);
    assert_eq!(report.processed_frames, 4);

    // 前一帧的框不会出现在失败帧上
    let frames = written_frames(output.path());
    assert!(green_pixels(&frames[1]) > 0);
    assert_eq!(green_pixels(&frames[2]), 0);
    assert!(green_pixels(&frames[3]) > 0);
}

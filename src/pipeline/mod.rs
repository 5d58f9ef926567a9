// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频处理流水线 (Video pipeline)
//!
//! 独立工作线程, 逐帧处理:
//! - Resize:   输出分辨率与检测分辨率规划
//! - Detect:   检测 + 跟踪编排
//! - Render:   在输出分辨率帧上绘制
//! - Artifact: 临时文件与分块交付
//!
//! 视频编解码通过 `VideoBackend` 接入 (FFmpeg 或 MJPEG 序列).
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;

use crate::detection::ImageSize;
use crate::error::Error;

pub mod artifact;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod mjpeg;
pub mod render;
pub mod resize;
pub mod video;

pub use artifact::{ChunkedArtifact, TempArtifact};
pub use render::BoxRenderer;
pub use resize::{fit_within, resize_if_needed, ResolutionPlan};
pub use video::{PipelineReport, PipelineState, VideoJob, VideoPipeline};

/// 默认视频后端: 启用 `ffmpeg` 时读写 MP4, 否则为 MJPEG 序列
pub fn default_backend() -> Arc<dyn VideoBackend> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(ffmpeg::FfmpegBackend::new())
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(mjpeg::MjpegBackend::default())
    }
}

/// 视频基本信息
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// 容器报告的总帧数 (可能为 0)
    pub total_frames: u64,
}

impl VideoInfo {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }
}

/// 帧来源 (解码)
pub trait FrameSource: Send {
    /// 下一帧, 结束时返回 `None`
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Error>;
}

/// 帧输出 (编码)
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), Error>;

    /// 刷新并关闭输出文件
    fn finish(self: Box<Self>) -> Result<(), Error>;
}

/// 视频编解码后端
pub trait VideoBackend: Send + Sync {
    fn probe(&self, input: &Path) -> Result<VideoInfo, Error>;

    /// 打开输入和输出, 输出帧尺寸为 `output_size`
    fn open(
        &self,
        input: &Path,
        output: &Path,
        info: &VideoInfo,
        output_size: ImageSize,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), Error>;

    /// 输出文件扩展名
    fn output_suffix(&self) -> &'static str;

    /// 输出的 MIME 类型
    fn content_type(&self) -> &'static str;
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! FFmpeg 视频后端 (ez-ffmpeg)
//!
//! 单个转码上下文在独立线程运行: 输入 → scale/format 滤镜 → 帧过滤器 → MP4 输出.
//! 帧过滤器把每帧 YUV420P 转成 RGB 交给流水线, 等待绘制后的帧再写回原位,
//! 两个容量为 1 的通道保证逐帧同步.

use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input, Output};
use image::RgbImage;

use super::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::detection::ImageSize;
use crate::error::Error;

/// FFmpeg 后端
#[derive(Clone, Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl VideoBackend for FfmpegBackend {
    fn probe(&self, input: &Path) -> Result<VideoInfo, Error> {
        let url = input.to_string_lossy().to_string();
        let info = find_video_stream_info(url)
            .map_err(|e| Error::decode("video", e))?
            .ok_or_else(|| Error::decode("video", "no video stream"))?;

        match info {
            StreamInfo::Video {
                width,
                height,
                fps,
                nb_frames,
                ..
            } => Ok(VideoInfo {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
                fps: fps as f64,
                total_frames: nb_frames.max(0) as u64,
            }),
            _ => Err(Error::decode("video", "no video stream")),
        }
    }

    fn open(
        &self,
        input: &Path,
        output: &Path,
        info: &VideoInfo,
        output_size: ImageSize,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), Error> {
        let (decoded_tx, decoded_rx) = crossbeam_channel::bounded::<RgbImage>(1);
        let (annotated_tx, annotated_rx) = crossbeam_channel::bounded::<RgbImage>(1);

        let in_url = input.to_string_lossy().to_string();
        let out_url = output.to_string_lossy().to_string();
        // yuv420p 需要偶数尺寸
        let scale = format!(
            "scale={}:{},format=yuv420p",
            output_size.width & !1,
            output_size.height & !1
        );
        let fps = info.fps;

        let handle = std::thread::Builder::new()
            .name("ffmpeg-transcode".into())
            .spawn(move || -> Result<(), String> {
                let filter = TrackFilter {
                    decoded_tx,
                    annotated_rx,
                    frames: 0,
                };
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("track", Box::new(filter));
                let out = Output::from(out_url.as_str()).add_frame_pipeline(pipe);

                let ctx = FfmpegContext::builder()
                    .input(Input::from(in_url.as_str()))
                    .filter_descs([scale.as_str()].into())
                    .output(out)
                    .build()
                    .map_err(|e| format!("构建失败: {}", e))?;

                let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
                sch.wait().map_err(|e| format!("转码失败: {}", e))?;
                tracing::debug!(fps, "ffmpeg transcode finished");
                Ok(())
            })
            .map_err(|e| Error::Resource(format!("Failed to start video writer: {}", e)))?;

        let source = FfmpegSource { rx: decoded_rx };
        let sink = FfmpegSink {
            tx: Some(annotated_tx),
            handle: Some(handle),
            size: ImageSize::new(output_size.width & !1, output_size.height & !1),
        };
        Ok((Box::new(source), Box::new(sink)))
    }

    fn output_suffix(&self) -> &'static str {
        ".mp4"
    }

    fn content_type(&self) -> &'static str {
        "video/mp4"
    }
}

struct FfmpegSource {
    rx: Receiver<RgbImage>,
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Error> {
        // 转码线程结束 (输入读完) 时通道断开
        Ok(self.rx.recv().ok())
    }
}

struct FfmpegSink {
    tx: Option<Sender<RgbImage>>,
    handle: Option<JoinHandle<Result<(), String>>>,
    size: ImageSize,
}

impl FfmpegSink {
    fn join(&mut self) -> Result<(), Error> {
        self.tx = None;
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(Error::Resource),
                Err(_) => Err(Error::Resource("video writer thread panicked".into())),
            },
            None => Ok(()),
        }
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), Error> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Resource("video writer closed".into()))?;
        let frame = if ImageSize::of(frame) == self.size {
            frame.clone()
        } else {
            image::imageops::crop_imm(frame, 0, 0, self.size.width, self.size.height).to_image()
        };
        tx.send(frame)
            .map_err(|_| Error::Resource("video writer closed".into()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), Error> {
        self.join()
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::debug!(error = %e, "ffmpeg writer closed early");
        }
    }
}

/// 帧过滤器: YUV420P ⇄ RGB, 与流水线逐帧同步
struct TrackFilter {
    decoded_tx: Sender<RgbImage>,
    annotated_rx: Receiver<RgbImage>,
    frames: u64,
}

impl FrameFilter for TrackFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!("✅ 转码过滤器启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        mut frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() {
                return Ok(None);
            }

            let raw = frame.as_mut_ptr();
            let w = (*raw).width as usize;
            let h = (*raw).height as usize;
            let planes = [(*raw).data[0], (*raw).data[1], (*raw).data[2]];
            let strides = [
                (*raw).linesize[0] as usize,
                (*raw).linesize[1] as usize,
                (*raw).linesize[2] as usize,
            ];
            if w == 0 || h == 0 || planes.iter().any(|p| p.is_null()) {
                return Ok(None);
            }

            let mut rgb = vec![0u8; w * h * 3];
            yuv420p_to_rgb(planes, strides, &mut rgb, w, h);
            let image = RgbImage::from_raw(w as u32, h as u32, rgb)
                .ok_or_else(|| "RGB buffer size mismatch".to_string())?;

            self.decoded_tx
                .send(image)
                .map_err(|_| "pipeline closed".to_string())?;
            let annotated = self
                .annotated_rx
                .recv()
                .map_err(|_| "pipeline closed".to_string())?;
            if annotated.width() as usize != w || annotated.height() as usize != h {
                return Err("annotated frame size mismatch".to_string());
            }

            rgb_to_yuv420p(annotated.as_raw(), planes, strides, w, h);
            self.frames += 1;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::debug!(frames = self.frames, "✅ 转码过滤器退出");
    }
}

/// YUV420P → RGB (BT.601 整数近似)
unsafe fn yuv420p_to_rgb(
    planes: [*mut u8; 3],
    strides: [usize; 3],
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * strides[0];
        let u_row = (y >> 1) * strides[1];
        let v_row = (y >> 1) * strides[2];

        for x in 0..width {
            let y_val = *planes[0].add(y_row + x) as i32;
            let u_val = *planes[1].add(u_row + (x >> 1)) as i32 - 128;
            let v_val = *planes[2].add(v_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}

/// RGB → YUV420P 写回帧 (色度取 2x2 平均)
unsafe fn rgb_to_yuv420p(
    rgb: &[u8],
    planes: [*mut u8; 3],
    strides: [usize; 3],
    width: usize,
    height: usize,
) {
    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) * 3;
            let (r, g, b) = (rgb[i] as i32, rgb[i + 1] as i32, rgb[i + 2] as i32);
            *planes[0].add(y * strides[0] + x) = ((77 * r + 150 * g + 29 * b) >> 8).clamp(0, 255) as u8;
        }
    }

    for cy in 0..height.div_ceil(2) {
        for cx in 0..width.div_ceil(2) {
            let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                    if x < width && y < height {
                        let i = (y * width + x) * 3;
                        r += rgb[i] as i32;
                        g += rgb[i + 1] as i32;
                        b += rgb[i + 2] as i32;
                        n += 1;
                    }
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
            let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
            *planes[1].add(cy * strides[1] + cx) = u.clamp(0, 255) as u8;
            *planes[2].add(cy * strides[2] + cx) = v.clamp(0, 255) as u8;
        }
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! MJPEG 序列后端: 输入输出都是首尾相接的 JPEG 帧
//!
//! 不依赖 FFmpeg, 用于没有启用 `ffmpeg` 功能的构建和测试.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use image::RgbImage;

use super::render::encode_jpeg;
use super::{FrameSink, FrameSource, VideoBackend, VideoInfo};
use crate::detection::ImageSize;
use crate::error::Error;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// 按 JPEG 标记切分帧
pub fn split_frames(data: &[u8]) -> Result<Vec<Range<usize>>, Error> {
    let truncated = || Error::decode("video", "truncated JPEG frame");
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < 2 || data[pos] != 0xFF || data[pos + 1] != SOI {
            return Err(Error::decode("video", format!("no JPEG frame at byte {}", pos)));
        }
        let mut i = pos + 2;
        let end = loop {
            if i + 1 >= data.len() {
                return Err(truncated());
            }
            if data[i] != 0xFF {
                return Err(Error::decode("video", format!("bad JPEG marker at byte {}", i)));
            }
            let marker = data[i + 1];
            if marker == 0xFF {
                // 填充字节
                i += 1;
                continue;
            }
            i += 2;
            match marker {
                EOI => break i,
                0x01 | 0xD0..=0xD7 => {}
                _ => {
                    if i + 1 >= data.len() {
                        return Err(truncated());
                    }
                    let seg_len = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
                    i += seg_len;
                    if marker == SOS {
                        // 熵编码数据: 0xFF00 与 RST 标记都属于数据
                        while i + 1 < data.len()
                            && !(data[i] == 0xFF
                                && data[i + 1] != 0x00
                                && !(0xD0..=0xD7).contains(&data[i + 1]))
                        {
                            i += 1;
                        }
                    }
                }
            }
        };
        frames.push(pos..end);
        pos = end;
    }

    Ok(frames)
}

fn decode_frame(bytes: &[u8]) -> Result<RgbImage, Error> {
    image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| Error::decode("video frame", e))
}

/// MJPEG 序列后端
#[derive(Clone, Debug)]
pub struct MjpegBackend {
    fps: f64,
    quality: u8,
}

impl MjpegBackend {
    pub fn new(fps: f64) -> Self {
        Self { fps, quality: 90 }
    }
}

impl Default for MjpegBackend {
    fn default() -> Self {
        Self::new(25.0)
    }
}

impl VideoBackend for MjpegBackend {
    fn probe(&self, input: &Path) -> Result<VideoInfo, Error> {
        let data = std::fs::read(input)?;
        let frames = split_frames(&data)?;
        let first = frames
            .first()
            .ok_or_else(|| Error::decode("video", "no frames"))?;
        let img = decode_frame(&data[first.clone()])?;
        Ok(VideoInfo {
            width: img.width(),
            height: img.height(),
            fps: self.fps,
            total_frames: frames.len() as u64,
        })
    }

    fn open(
        &self,
        input: &Path,
        output: &Path,
        _info: &VideoInfo,
        output_size: ImageSize,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), Error> {
        let data = std::fs::read(input)?;
        let frames = split_frames(&data)?;
        let file = File::create(output)
            .map_err(|e| Error::Resource(format!("Failed to create video writer: {}", e)))?;

        let source = MjpegSource {
            data,
            frames,
            next: 0,
        };
        let sink = MjpegSink {
            writer: BufWriter::new(file),
            size: output_size,
            quality: self.quality,
        };
        Ok((Box::new(source), Box::new(sink)))
    }

    fn output_suffix(&self) -> &'static str {
        ".mjpeg"
    }

    fn content_type(&self) -> &'static str {
        "video/x-motion-jpeg"
    }
}

struct MjpegSource {
    data: Vec<u8>,
    frames: Vec<Range<usize>>,
    next: usize,
}

impl FrameSource for MjpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Error> {
        let Some(range) = self.frames.get(self.next).cloned() else {
            return Ok(None);
        };
        self.next += 1;
        decode_frame(&self.data[range]).map(Some)
    }
}

struct MjpegSink {
    writer: BufWriter<File>,
    size: ImageSize,
    quality: u8,
}

impl FrameSink for MjpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), Error> {
        if ImageSize::of(frame) != self.size {
            return Err(Error::Resource(format!(
                "frame size {}x{} does not match writer {}x{}",
                frame.width(),
                frame.height(),
                self.size.width,
                self.size.height
            )));
        }
        let bytes = encode_jpeg(frame, self.quality)?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }
}

/// 把帧序列编码为 MJPEG 字节
pub fn encode_sequence(frames: &[RgbImage], quality: u8) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(&encode_jpeg(frame, quality)?);
    }
    Ok(out)
}

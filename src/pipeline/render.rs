// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 结果绘制: 绿色框 + 可选标签, JPEG 编码

use std::io::Cursor;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::error::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LINE_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;

/// 框绘制器, 字体可选 (没有字体时只画框)
pub struct BoxRenderer {
    font: Option<FontVec>,
}

impl BoxRenderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// 从字体文件加载, 失败时退化为无标签
    pub fn from_font_path(path: Option<&str>) -> Self {
        let font = path.and_then(|p| match std::fs::read(p) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    tracing::info!("✅ 标签字体已加载: {}", p);
                    Some(font)
                }
                Err(e) => {
                    tracing::warn!("⚠️ 字体解析失败 {}: {}", p, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("⚠️ 字体读取失败 {}: {}", p, e);
                None
            }
        });
        Self::new(font)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 画一个框和标签, 坐标超出画面时裁剪
    pub fn draw_box(&self, image: &mut RgbImage, ltrb: [f32; 4], label: &str) {
        let (w, h) = (image.width() as i32, image.height() as i32);
        if w == 0 || h == 0 {
            return;
        }
        let x1 = (ltrb[0] as i32).clamp(0, w - 1);
        let y1 = (ltrb[1] as i32).clamp(0, h - 1);
        let x2 = (ltrb[2] as i32).clamp(0, w - 1);
        let y2 = (ltrb[3] as i32).clamp(0, h - 1);
        if x2 <= x1 || y2 <= y1 {
            return;
        }

        // 线宽 2: 向内收缩再画一圈
        for i in 0..LINE_THICKNESS {
            let bw = x2 - x1 - 2 * i;
            let bh = y2 - y1 - 2 * i;
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 + i, y1 + i).of_size(bw as u32 + 1, bh as u32 + 1);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let ty = (y1 - LABEL_SCALE as i32 - 2).max(0);
            draw_text_mut(image, BOX_COLOR, x1, ty, PxScale::from(LABEL_SCALE), font, label);
        }
    }
}

/// RGB → JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(image)
        .map_err(|e| Error::Resource(format!("jpeg encode failed: {}", e)))?;
    Ok(buf.into_inner())
}

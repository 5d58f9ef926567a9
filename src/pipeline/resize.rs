// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 分辨率管理: 等比例限制尺寸 + 快速缩放

use fast_image_resize as fr;
use image::RgbImage;

use crate::detection::ImageSize;
use crate::error::Error;

/// 等比例缩放到 `max_w x max_h` 以内, 已经在范围内则不变
pub fn fit_within(size: ImageSize, max_w: u32, max_h: u32) -> ImageSize {
    if size.width <= max_w && size.height <= max_h {
        return size;
    }
    let (w, h) = (size.width as u64, size.height as u64);
    let (mw, mh) = (max_w as u64, max_h as u64);
    // 受限边恰好落在上限, 另一边整数截断
    if w * mh >= h * mw {
        ImageSize::new(max_w, ((h * mw / w) as u32).max(1))
    } else {
        ImageSize::new(((w * mh / h) as u32).max(1), max_h)
    }
}

/// 缩放 RGB 图像 (双线性, 尺寸相同时直接克隆)
pub fn resize_rgb(image: &RgbImage, target: ImageSize) -> Result<RgbImage, Error> {
    if ImageSize::of(image) == target {
        return Ok(image.clone());
    }

    let src = fr::images::ImageRef::new(
        image.width(),
        image.height(),
        image.as_raw(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| Error::Resource(format!("resize source: {}", e)))?;
    let mut dst = fr::images::Image::new(target.width, target.height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| Error::Resource(format!("resize: {}", e)))?;

    RgbImage::from_raw(target.width, target.height, dst.into_vec())
        .ok_or_else(|| Error::Resource("resize produced a short buffer".into()))
}

/// 请求端点: 大于上限的图像先缩小
pub fn resize_if_needed(image: RgbImage, max_w: u32, max_h: u32) -> Result<RgbImage, Error> {
    let target = fit_within(ImageSize::of(&image), max_w, max_h);
    if target == ImageSize::of(&image) {
        return Ok(image);
    }
    resize_rgb(&image, target)
}

/// 视频处理的分辨率规划
///
/// 输出分辨率: 原始 (full_resolution) 或限制在处理上限内;
/// 检测分辨率: 在输出分辨率基础上再限制到检测上限.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolutionPlan {
    pub source: ImageSize,
    pub output: ImageSize,
    pub detection: ImageSize,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl ResolutionPlan {
    pub fn new(
        source: ImageSize,
        full_resolution: bool,
        max_output: (u32, u32),
        max_detection: (u32, u32),
    ) -> Self {
        let output = if full_resolution {
            source
        } else {
            fit_within(source, max_output.0, max_output.1)
        };
        let detection = fit_within(output, max_detection.0, max_detection.1);
        Self {
            source,
            output,
            detection,
            scale_x: output.width as f32 / detection.width.max(1) as f32,
            scale_y: output.height as f32 / detection.height.max(1) as f32,
        }
    }

    pub fn needs_detection_resize(&self) -> bool {
        self.output != self.detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_keeps_small() {
        let s = ImageSize::new(320, 240);
        assert_eq!(fit_within(s, 640, 640), s);
    }

    #[test]
    fn test_fit_within_landscape() {
        assert_eq!(
            fit_within(ImageSize::new(1920, 1080), 640, 640),
            ImageSize::new(640, 360)
        );
    }

    #[test]
    fn test_fit_within_portrait() {
        assert_eq!(
            fit_within(ImageSize::new(1000, 2000), 640, 640),
            ImageSize::new(320, 640)
        );
    }

    #[test]
    fn test_plan_full_resolution() {
        let plan = ResolutionPlan::new(ImageSize::new(1280, 720), true, (640, 640), (384, 384));
        assert_eq!(plan.output, ImageSize::new(1280, 720));
        assert_eq!(plan.detection, ImageSize::new(384, 216));
        assert!((plan.scale_x - 1280.0 / 384.0).abs() < 1e-5);
        assert!((plan.scale_y - 720.0 / 216.0).abs() < 1e-5);
    }

    #[test]
    fn test_plan_bounded() {
        let plan = ResolutionPlan::new(ImageSize::new(1280, 720), false, (640, 640), (384, 384));
        assert_eq!(plan.output, ImageSize::new(640, 360));
        assert_eq!(plan.detection, ImageSize::new(384, 216));
        assert!(plan.needs_detection_resize());
    }

    #[test]
    fn test_plan_small_video() {
        let plan = ResolutionPlan::new(ImageSize::new(320, 240), true, (640, 640), (384, 384));
        assert_eq!(plan.detection, plan.output);
        assert_eq!(plan.scale_x, 1.0);
        assert!(!plan.needs_detection_resize());
    }

    #[test]
    fn test_resize_rgb() {
        let img = RgbImage::from_pixel(100, 50, image::Rgb([10, 200, 30]));
        let out = resize_rgb(&img, ImageSize::new(40, 20)).unwrap();
        assert_eq!(out.dimensions(), (40, 20));
        assert_eq!(out.get_pixel(10, 10).0, [10, 200, 30]);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 框合法性过滤 (尺寸 + 行人宽高比)

use super::types::ImageSize;
use crate::config::ValidatorSettings;

/// 行人框几何过滤器
#[derive(Clone, Debug)]
pub struct BoxValidator {
    min_width: f32,
    min_height: f32,
    min_aspect: f32,
    max_aspect: f32,
    max_frame_fraction: f32,
}

impl BoxValidator {
    pub fn new(settings: &ValidatorSettings) -> Self {
        Self {
            min_width: settings.min_width,
            min_height: settings.min_height,
            min_aspect: settings.min_aspect,
            max_aspect: settings.max_aspect,
            max_frame_fraction: settings.max_frame_fraction,
        }
    }

    /// 判断 [l, t, r, b] 是否为合理的行人框
    ///
    /// 依次检查: 非退化 → 最小尺寸 → 宽高比 (h/w) → 相对画面的最大尺寸.
    pub fn is_valid(&self, ltrb: [f32; 4], image: Option<ImageSize>) -> bool {
        let [l, t, r, b] = ltrb;
        if !(r > l && b > t) {
            return false;
        }

        let width = r - l;
        let height = b - t;
        if width < self.min_width || height < self.min_height {
            return false;
        }

        let aspect = height / width;
        if !(self.min_aspect..=self.max_aspect).contains(&aspect) {
            return false;
        }

        if let Some(size) = image {
            if width > self.max_frame_fraction * size.width as f32
                || height > self.max_frame_fraction * size.height as f32
            {
                return false;
            }
        }

        true
    }
}

impl Default for BoxValidator {
    fn default() -> Self {
        Self::new(&ValidatorSettings::default())
    }
}

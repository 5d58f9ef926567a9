// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置 (JSON 文件 + 环境变量 + 命令行)
pub mod detection; // 检测与跟踪
pub mod error; // 错误类型
pub mod models; // 检测模型
pub mod pipeline; // 视频处理流水线
pub mod progress; // 进度广播
pub mod service; // 请求处理服务

#[cfg(feature = "web")]
pub mod server; // HTTP + WebSocket 服务

pub use crate::config::{Args, Settings};
pub use crate::detection::{
    Detection, Detector, ImageSize, SharedDetector, TrackBox, TrackOrchestrator, TrackingSession,
};
pub use crate::error::{Error, Result};
pub use crate::progress::{ProgressBroadcaster, ProgressEvent};
pub use crate::service::TrackingService;

/// 时间戳字符串 (UTC, 精确到纳秒), 用于生成唯一文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Utc::now().format(&fmt).to_string()
}

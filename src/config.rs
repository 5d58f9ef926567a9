// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 服务配置 - 通过JSON文件与环境变量调整参数
//! Service configuration: JSON file + environment overrides

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// 命令行参数 (Command line arguments)
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Person detection and tracking service", long_about = None)]
pub struct Args {
    /// JSON 配置文件路径, 不存在时自动创建
    #[arg(long, default_value_t = String::from("person_track.json"))]
    pub config: String,

    /// ONNX 模型路径 (覆盖配置文件)
    #[arg(long)]
    pub model: Option<String>,

    /// 监听地址 (覆盖配置文件)
    #[arg(long)]
    pub bind: Option<String>,

    /// 并发任务上限
    #[arg(long)]
    pub workers: Option<usize>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<String>,
}

/// 检测器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub model_path: String,
    pub conf_threshold: f32, // 检测置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    pub input_size: u32,     // 推理输入尺寸
    pub person_class_id: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: String::from("models/yolov8n.onnx"),
            conf_threshold: 0.40,
            iou_threshold: 0.60,
            input_size: 640,
            person_class_id: 0,
        }
    }
}

/// 跟踪器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// 位置平滑系数 α, 1.0 表示不平滑
    pub smooth_alpha: f32,
    pub max_age: u32, // 最大丢失帧数
    pub n_init: u32,  // 确认所需命中次数
    pub high_score_threshold: f32,
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
    pub kalman_process_noise: f32,
    pub kalman_obs_noise: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            smooth_alpha: 1.0,
            max_age: 30,
            n_init: 1,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }
}

/// 框合法性参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    pub min_width: f32,
    pub min_height: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub max_frame_fraction: f32,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            min_width: 10.0,
            min_height: 20.0,
            min_aspect: 1.0,
            max_aspect: 3.0,
            max_frame_fraction: 0.8,
        }
    }
}

/// 原始检测补充参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub proximity_px: f32,
    pub iou_threshold: f32,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            proximity_px: 20.0,
            iou_threshold: 0.5,
        }
    }
}

/// 视频流水线参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub detection_width: u32,
    pub detection_height: u32,
    pub progress_every: u64,
    pub stats_every: u64,
    pub min_output_bytes: u64,
    pub chunk_size: usize,
    pub max_detections: usize,
    pub max_skip_frames: u32,
    /// 单个任务的截止时间 (秒)
    pub job_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_width: 640,
            max_height: 640,
            detection_width: 384,
            detection_height: 384,
            progress_every: 10,
            stats_every: 30,
            min_output_bytes: 1000,
            chunk_size: 1024 * 1024,
            max_detections: 100,
            max_skip_frames: 5,
            job_timeout_secs: 600,
        }
    }
}

impl PipelineSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// HTTP 服务参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub max_concurrent_jobs: usize,
    pub font_path: Option<String>,
    pub temp_dir: Option<String>,
    /// 上传大小上限 (MB)
    pub max_upload_mb: usize,
    /// 实时模式单条消息的处理时限 (秒)
    pub live_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:8000"),
            max_concurrent_jobs: 4,
            font_path: None,
            temp_dir: None,
            max_upload_mb: 512,
            live_timeout_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn live_timeout(&self) -> Duration {
        Duration::from_secs(self.live_timeout_secs.max(1))
    }
}

/// 全部配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub validator: ValidatorSettings,
    pub fallback: FallbackSettings,
    pub pipeline: PipelineSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// 从JSON文件加载配置, 然后应用环境变量
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut settings = match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    tracing::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    tracing::error!("❌ 保存配置失败: {}", e);
                } else {
                    tracing::info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => tracing::error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 环境变量覆盖: SMOOTH_ALPHA, MAX_AGE, YOLO_CONF_THRESHOLD, YOLO_IOU_THRESHOLD
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("⚠️  环境变量 {}={} 无法解析, 已忽略", key, raw);
                    None
                }
            }
        }

        if let Some(alpha) = parse::<f32>("SMOOTH_ALPHA", lookup("SMOOTH_ALPHA")) {
            self.tracker.smooth_alpha = alpha.clamp(0.0, 1.0);
        }
        if let Some(age) = parse("MAX_AGE", lookup("MAX_AGE")) {
            self.tracker.max_age = age;
        }
        if let Some(conf) = parse("YOLO_CONF_THRESHOLD", lookup("YOLO_CONF_THRESHOLD")) {
            self.detector.conf_threshold = conf;
        }
        if let Some(iou) = parse("YOLO_IOU_THRESHOLD", lookup("YOLO_IOU_THRESHOLD")) {
            self.detector.iou_threshold = iou;
        }
    }

    /// 命令行参数覆盖
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.detector.model_path = model.clone();
        }
        if let Some(bind) = &args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(workers) = args.workers {
            self.server.max_concurrent_jobs = workers.max(1);
        }
        if let Some(font) = &args.font {
            self.server.font_path = Some(font.clone());
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!("🎛️  当前配置:");
        tracing::info!("  模型: {}", self.detector.model_path);
        tracing::info!(
            "  检测置信度: {:.2} | NMS IOU: {:.2}",
            self.detector.conf_threshold,
            self.detector.iou_threshold
        );
        tracing::info!(
            "  平滑系数: {:.2} | 最大丢失帧: {} | 确认帧: {}",
            self.tracker.smooth_alpha,
            self.tracker.max_age,
            self.tracker.n_init
        );
        tracing::info!(
            "  处理分辨率: {}x{} | 检测分辨率: {}x{}",
            self.pipeline.max_width,
            self.pipeline.max_height,
            self.pipeline.detection_width,
            self.pipeline.detection_height
        );
    }
}

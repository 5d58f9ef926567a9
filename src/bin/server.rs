// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 行人跟踪服务 (Person tracking server)
//!
//! 启动流程:
//! 1. 日志 (RUST_LOG, 默认 person_track_rs=info)
//! 2. 配置: JSON 文件 → 环境变量 → 命令行
//! 3. 检测器 (YOLOv8 ONNX) 与视频后端 (默认 FFmpeg)
//! 4. HTTP + WebSocket 服务
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

use person_track_rs::detection::detector::shared;
use person_track_rs::detection::SharedDetector;
use person_track_rs::pipeline::default_backend;
use person_track_rs::{server, Args, Settings, TrackingService};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_detector(settings: &Settings) -> anyhow::Result<SharedDetector> {
    let detector = person_track_rs::models::YoloDetector::new(&settings.detector)
        .with_context(|| format!("加载模型失败: {}", settings.detector.model_path))?;
    Ok(shared(detector))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("person_track_rs=info,person_track_server=info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config);
    settings.apply_args(&args);
    settings.print_summary();

    let detector = load_detector(&settings)?;
    let backend = default_backend();
    tracing::info!("🎞️  视频后端输出: {}", backend.content_type());
    let service = TrackingService::new(settings, detector).with_backend(backend);

    server::serve(Arc::new(service)).await
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测与跟踪系统 (Detection & Tracking)
///
/// - Detector:     目标检测接口
/// - Validator:    行人框几何过滤
/// - Tracker:      多目标跟踪 (ByteTrack)
/// - Smoother:     轨迹框平滑
/// - Orchestrator: 每帧编排 (过滤 → 跟踪 → 平滑 → 补充)
/// - Confidence:   置信度回填
pub mod bytetrack;
pub mod confidence;
pub mod detector;
pub mod orchestrator;
pub mod session;
pub mod smoother;
pub mod tracker;
pub mod types;
pub mod validator;

pub use bytetrack::ByteTracker;
pub use confidence::{compute_iou, match_confidence};
pub use detector::{Detector, DetectorError, SharedDetector};
pub use orchestrator::TrackOrchestrator;
pub use session::{bytetrack_factory, TrackerFactory, TrackingSession};
pub use smoother::TrackSmoother;
pub use tracker::{TrackState, Tracker, TrackerError, TrackerInput};
pub use types::{Detection, ImageSize, TrackBox, TrackOrigin, PERSON_CLASS_ID, PERSON_LABEL};
pub use validator::BoxValidator;

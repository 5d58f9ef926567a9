// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型 (Error taxonomy)
//!
//! 对外只暴露经过清洗的错误消息, 原始错误在转换时写入日志.

use std::path::Path;

use crate::detection::detector::DetectorError;
use crate::detection::tracker::TrackerError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// 输入字节不是合法的图像/视频
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// 视频无法打开/写入, 或输出产物异常
    #[error("{0}")]
    Resource(String),

    #[error("Output video is too small ({size} bytes, expected more than {min} bytes)")]
    ArtifactTooSmall { size: u64, min: u64 },

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// 实时连接写入失败
    #[error("channel closed: {0}")]
    Channel(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job exceeded its deadline of {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0} is not available in this build")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        tracing::error!(error = %e, "I/O error");
        Error::Io(e.kind().to_string())
    }
}

impl Error {
    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// 客户端错误 (HTTP 400)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Decode { .. } => 400,
            Error::Timeout(_) => 504,
            Error::Unsupported(_) => 501,
            _ => 500,
        }
    }
}

/// 临时文件清理结果
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    AlreadyGone,
    Failed(String),
}

impl CleanupOutcome {
    /// 删除文件并返回结果
    pub fn remove(path: &Path) -> Self {
        match std::fs::remove_file(path) {
            Ok(()) => CleanupOutcome::Removed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CleanupOutcome::AlreadyGone,
            Err(e) => CleanupOutcome::Failed(e.to_string()),
        }
    }

    /// 记录清理结果
    pub fn log(self, path: &Path) -> Self {
        match &self {
            CleanupOutcome::Removed => tracing::debug!(path = %path.display(), "🧹 temp file removed"),
            CleanupOutcome::AlreadyGone => {
                tracing::debug!(path = %path.display(), "temp file already gone")
            }
            CleanupOutcome::Failed(reason) => {
                tracing::warn!(path = %path.display(), %reason, "⚠️ temp file cleanup failed")
            }
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, CleanupOutcome::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::decode("image", "bad magic").status_code(), 400);
        assert!(Error::decode("image", "bad magic").is_client_error());
        assert_eq!(Error::Resource("writer".into()).status_code(), 500);
        assert_eq!(Error::Unsupported("video backend").status_code(), 501);
        assert!(!Error::Cancelled.is_client_error());
    }

    #[test]
    fn test_decode_message() {
        let e = Error::decode("image", "unexpected EOF");
        assert_eq!(e.to_string(), "Failed to decode image: unexpected EOF");
    }

    #[test]
    fn test_cleanup_missing_file() {
        let path = std::env::temp_dir().join(format!("missing-{}.mp4", uuid::Uuid::new_v4()));
        assert_eq!(CleanupOutcome::remove(&path), CleanupOutcome::AlreadyGone);
    }

    #[test]
    fn test_cleanup_existing_file() {
        let path = std::env::temp_dir().join(format!("cleanup-{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"x").unwrap();
        let outcome = CleanupOutcome::remove(&path).log(&path);
        assert_eq!(outcome, CleanupOutcome::Removed);
        assert!(outcome.is_ok());
        assert!(!path.exists());
    }
}

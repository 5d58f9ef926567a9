// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 临时文件与分块输出
//!
//! `TempArtifact` 在 drop 时删除文件; `ChunkedArtifact` 逐块读出文件,
//! 最后一块交付后 (或消费方提前放弃时) 删除文件.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{CleanupOutcome, Error};
use crate::gen_time_string;

/// 带自动清理的临时文件
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// 在目录下生成唯一文件名 (时间戳 + uuid)
    pub fn new_in(dir: &Path, prefix: &str, suffix: &str) -> Self {
        let name = format!(
            "{}-{}-{}{}",
            prefix,
            gen_time_string(""),
            uuid::Uuid::new_v4().simple(),
            suffix
        );
        Self {
            path: dir.join(name),
            armed: true,
        }
    }

    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self::new_in(&std::env::temp_dir(), prefix, suffix)
    }

    /// 创建并写入内容
    pub fn write(prefix: &str, suffix: &str, contents: &[u8]) -> Result<Self, Error> {
        let artifact = Self::new(prefix, suffix);
        std::fs::write(&artifact.path, contents)?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64, Error> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// 立即删除并返回结果
    pub fn cleanup(mut self) -> CleanupOutcome {
        self.armed = false;
        CleanupOutcome::remove(&self.path).log(&self.path)
    }

    /// 转为分块读取器, 删除责任一起转移
    pub fn into_chunks(mut self, chunk_size: usize) -> Result<ChunkedArtifact, Error> {
        let file = File::open(&self.path)?;
        self.armed = false;
        Ok(ChunkedArtifact {
            path: std::mem::take(&mut self.path),
            file: Some(file),
            chunk_size: chunk_size.max(1),
            outcome: None,
        })
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            let _ = CleanupOutcome::remove(&self.path).log(&self.path);
        }
    }
}

/// 分块读取文件, 读完后删除
pub struct ChunkedArtifact {
    path: PathBuf,
    file: Option<File>,
    chunk_size: usize,
    outcome: Option<CleanupOutcome>,
}

impl ChunkedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件删除结果 (尚未删除时为 None)
    pub fn cleanup_outcome(&self) -> Option<&CleanupOutcome> {
        self.outcome.as_ref()
    }

    fn finish(&mut self) {
        // 先关闭文件再删除
        self.file = None;
        if self.outcome.is_none() {
            self.outcome = Some(CleanupOutcome::remove(&self.path).log(&self.path));
        }
    }
}

impl Iterator for ChunkedArtifact {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let file = self.file.as_mut()?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finish();
                    return Some(Err(e.into()));
                }
            }
        }

        if filled == 0 {
            self.finish();
            return None;
        }
        buf.truncate(filled);
        if filled < self.chunk_size {
            // 短块即最后一块
            self.finish();
        }
        Some(Ok(buf))
    }
}

impl Drop for ChunkedArtifact {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_artifact_removed_on_drop() {
        let path = {
            let a = TempArtifact::write("test", ".bin", b"hello").unwrap();
            assert_eq!(a.size().unwrap(), 5);
            a.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_chunks_and_delete_after_last() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let a = TempArtifact::write("chunks", ".bin", &data).unwrap();
        let path = a.path().to_path_buf();
        let mut chunks = a.into_chunks(1000).unwrap();

        let c1 = chunks.next().unwrap().unwrap();
        assert_eq!(c1.len(), 1000);
        assert!(path.exists());
        let c2 = chunks.next().unwrap().unwrap();
        assert!(path.exists());
        let c3 = chunks.next().unwrap().unwrap();
        assert_eq!(c3.len(), 500);
        // 最后一块交付后文件已删除
        assert!(!path.exists());
        assert_eq!(chunks.cleanup_outcome(), Some(&CleanupOutcome::Removed));
        assert!(chunks.next().is_none());

        let joined: Vec<u8> = [c1, c2, c3].concat();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let a = TempArtifact::write("exact", ".bin", &[7u8; 2000]).unwrap();
        let path = a.path().to_path_buf();
        let chunks: Vec<_> = a.into_chunks(1000).unwrap().collect();
        assert_eq!(chunks.len(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn test_abandoned_stream_cleans_up() {
        let a = TempArtifact::write("abandon", ".bin", &[1u8; 3000]).unwrap();
        let path = a.path().to_path_buf();
        let mut chunks = a.into_chunks(1000).unwrap();
        chunks.next();
        drop(chunks);
        assert!(!path.exists());
    }
}

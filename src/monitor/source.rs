//! Where memory samples come from.
//!
//! [`ProcMeminfo`] reads `/proc/meminfo` on Linux. [`FixedMemorySource`]
//! reports whatever it was last told, which is what tests and hosts without
//! procfs use.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorSampleError {
    #[error("I/O error sampling memory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed memory info line: {0}")]
    Parse(String),

    #[error("Memory info is missing `{0}`")]
    MissingField(&'static str),

    #[error("Memory source unavailable")]
    Unavailable,
}

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    /// Free memory as a fraction of total (0.0 - 1.0).
    pub fn free_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.free_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// A platform memory reader.
#[async_trait]
pub trait MemorySource: Send + Sync {
    async fn sample(&self) -> Result<MemorySample, MonitorSampleError>;
}

/// Reads `MemAvailable` and `MemTotal` from a meminfo file.
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from a different file (tests, containers with a bind-mounted meminfo).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse meminfo text. Values are reported in kB.
    pub fn parse(text: &str) -> Result<MemorySample, MonitorSampleError> {
        let mut total = None;
        let mut available = None;
        let mut free = None;

        for line in text.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let target = match key.trim() {
                "MemTotal" => &mut total,
                "MemAvailable" => &mut available,
                "MemFree" => &mut free,
                _ => continue,
            };
            let bytes = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
                .and_then(|kb| kb.checked_mul(1024))
                .ok_or_else(|| MonitorSampleError::Parse(line.to_string()))?;
            *target = Some(bytes);
        }

        let total_bytes = total.ok_or(MonitorSampleError::MissingField("MemTotal"))?;
        // Kernels before 3.14 have no MemAvailable.
        let free_bytes = available
            .or(free)
            .ok_or(MonitorSampleError::MissingField("MemAvailable"))?;

        Ok(MemorySample {
            free_bytes,
            total_bytes,
        })
    }
}

#[async_trait]
impl MemorySource for ProcMeminfo {
    async fn sample(&self) -> Result<MemorySample, MonitorSampleError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Self::parse(&text)
    }
}

/// A memory source whose reading is set by hand.
#[derive(Debug)]
pub struct FixedMemorySource {
    free_bytes: AtomicU64,
    total_bytes: AtomicU64,
    failing: AtomicBool,
}

impl FixedMemorySource {
    pub fn new(free_bytes: u64, total_bytes: u64) -> Self {
        Self {
            free_bytes: AtomicU64::new(free_bytes),
            total_bytes: AtomicU64::new(total_bytes),
            failing: AtomicBool::new(false),
        }
    }

    /// A source reporting the given free ratio of a 16 GB machine.
    pub fn with_free_ratio(ratio: f64) -> Self {
        let total = 16 * 1024 * 1024 * 1024u64;
        Self::new((total as f64 * ratio) as u64, total)
    }

    pub fn set_free_bytes(&self, free_bytes: u64) {
        self.free_bytes.store(free_bytes, Ordering::Release);
    }

    pub fn set_free_ratio(&self, ratio: f64) {
        let total = self.total_bytes.load(Ordering::Acquire);
        self.set_free_bytes((total as f64 * ratio.clamp(0.0, 1.0)) as u64);
    }

    /// Make subsequent samples fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

#[async_trait]
impl MemorySource for FixedMemorySource {
    async fn sample(&self) -> Result<MemorySample, MonitorSampleError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(MonitorSampleError::Unavailable);
        }
        Ok(MemorySample {
            free_bytes: self.free_bytes.load(Ordering::Acquire),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16303428 kB\n\
                           MemFree:          812344 kB\n\
                           MemAvailable:    8151714 kB\n\
                           Buffers:          204812 kB\n";

    #[test]
    fn test_parse_meminfo() {
        let sample = ProcMeminfo::parse(MEMINFO).unwrap();
        assert_eq!(sample.total_bytes, 16303428 * 1024);
        assert_eq!(sample.free_bytes, 8151714 * 1024);
        assert!((sample.free_ratio() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_parse_falls_back_to_memfree() {
        let sample = ProcMeminfo::parse("MemTotal: 1000 kB\nMemFree: 250 kB\n").unwrap();
        assert_eq!(sample.free_bytes, 250 * 1024);
    }

    #[test]
    fn test_parse_missing_total() {
        let err = ProcMeminfo::parse("MemFree: 250 kB\n").unwrap_err();
        assert!(matches!(err, MonitorSampleError::MissingField("MemTotal")));
    }

    #[test]
    fn test_parse_garbage_value() {
        let err = ProcMeminfo::parse("MemTotal: lots kB\n").unwrap_err();
        assert!(matches!(err, MonitorSampleError::Parse(_)));
    }

    #[test]
    fn test_parse_overflowing_value() {
        let text = format!("MemTotal: {} kB\nMemAvailable: 1 kB\n", u64::MAX);
        let err = ProcMeminfo::parse(&text).unwrap_err();
        assert!(matches!(err, MonitorSampleError::Parse(_)));
    }

    #[tokio::test]
    async fn test_meminfo_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, MEMINFO).unwrap();

        let sample = ProcMeminfo::with_path(&path).sample().await.unwrap();
        assert_eq!(sample.total_bytes, 16303428 * 1024);

        let missing = ProcMeminfo::with_path(dir.path().join("nope"));
        assert!(matches!(missing.sample().await, Err(MonitorSampleError::Io(_))));
    }

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FixedMemorySource::new(500, 1000);
        assert_eq!(source.sample().await.unwrap().free_ratio(), 0.5);

        source.set_free_ratio(0.1);
        assert!((source.sample().await.unwrap().free_ratio() - 0.1).abs() < 1e-9);

        source.set_failing(true);
        assert!(source.sample().await.is_err());
    }
}

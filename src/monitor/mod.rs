//! Telemetry: memory pressure and operation latency.
//!
//! - [`pressure`]: MemoryPressureLevel and the hysteretic classifier
//! - [`source`]: Memory readers (procfs, fixed)
//! - [`telemetry`]: The monitor itself, with its lock-free status snapshot

pub mod pressure;
pub mod source;
pub mod telemetry;

pub use pressure::MemoryPressureLevel;
pub use source::{FixedMemorySource, MemorySample, MemorySource, MonitorSampleError, ProcMeminfo};
pub use telemetry::{MonitorStatus, OperationKind, TelemetryMonitor};

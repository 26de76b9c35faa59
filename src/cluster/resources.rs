//! Resource limits for execution-unit stages.
//!
//! Limits are encoded into the unit specification so the execution
//! platform enforces them independently of in-process enforcement.

use serde::{Deserialize, Serialize};

/// Resource limits for one stage of an execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitLimits {
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    pub cpu_cores: f64,
    /// Maximum number of processes allowed.
    pub max_pids: u64,
    /// Platform-enforced deadline in seconds; 0 means no deadline.
    pub deadline_sec: u64,
}

impl Default for UnitLimits {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cpu_cores: 2.0,
            max_pids: 256,
            deadline_sec: 0,
        }
    }
}

impl UnitLimits {
    /// Creates limits with the given parameters.
    pub fn new(memory_mb: u64, cpu_cores: f64, max_pids: u64, deadline_sec: u64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
            max_pids,
            deadline_sec,
        }
    }

    /// Fixed limits for code-loading stages: copying a code tree needs
    /// little more than IO.
    pub fn loader() -> Self {
        Self {
            memory_mb: 256,
            cpu_cores: 0.5,
            max_pids: 32,
            deadline_sec: 0,
        }
    }

    /// Returns the memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// Returns the CPU period in microseconds (fixed at 100ms).
    pub fn cpu_period(&self) -> i64 {
        100_000
    }

    /// Returns the CPU quota based on cores allocated.
    ///
    /// quota = period * cores, so 1.0 core = 100% of one CPU.
    pub fn cpu_quota(&self) -> i64 {
        (self.cpu_period() as f64 * self.cpu_cores) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_bytes_conversion() {
        let limits = UnitLimits::new(512, 1.0, 100, 300);
        assert_eq!(limits.memory_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn cpu_quota_calculation() {
        let limits = UnitLimits::new(512, 2.0, 100, 300);
        assert_eq!(limits.cpu_period(), 100_000);
        assert_eq!(limits.cpu_quota(), 200_000);
    }

    #[test]
    fn loader_limits_are_small() {
        let limits = UnitLimits::loader();
        assert!(limits.memory_mb < UnitLimits::default().memory_mb);
        assert!(limits.cpu_cores < UnitLimits::default().cpu_cores);
        assert_eq!(limits.deadline_sec, 0);
    }
}

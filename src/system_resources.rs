use sysinfo::{System, SystemExt};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Host memory at one point in time. sysinfo reports bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn capture() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            total_bytes: sys.total_memory(),
            available_bytes: sys.available_memory(),
        }
    }

    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_GB
    }

    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / BYTES_PER_GB
    }

    pub fn can_hold(&self, bytes: u64) -> bool {
        bytes <= self.available_bytes
    }

    /// Logs the snapshot and warns when the weights likely will not fit.
    pub fn log_for_weights(&self, weights_file_bytes: u64) {
        log::info!(
            "Memory: {:.2} GB available of {:.2} GB; weights file is {:.2} GB",
            self.available_gb(),
            self.total_gb(),
            weights_file_bytes as f64 / BYTES_PER_GB
        );
        if self.available_bytes > 0 && !self.can_hold(weights_file_bytes) {
            log::warn!(
                "Loading {:.2} GB of weights may exceed the {:.2} GB of available memory",
                weights_file_bytes as f64 / BYTES_PER_GB,
                self.available_gb()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_reports_consistent_memory() {
        let snapshot = MemorySnapshot::capture();
        assert!(
            snapshot.available_bytes <= snapshot.total_bytes,
            "available {} should not exceed total {}",
            snapshot.available_bytes,
            snapshot.total_bytes
        );
    }

    #[test]
    fn test_can_hold_compares_against_available() {
        let snapshot = MemorySnapshot { total_bytes: 8_000, available_bytes: 4_000 };
        assert!(snapshot.can_hold(4_000));
        assert!(!snapshot.can_hold(4_001));
        assert!(!snapshot.can_hold(u64::MAX));
        assert!((snapshot.total_gb() - 8_000.0 / BYTES_PER_GB).abs() < 1e-12);
    }
}

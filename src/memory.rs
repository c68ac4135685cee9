//! Available-memory monitor for the cache's pressure floor.

use sysinfo::System;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemorySample {
    pub available_mb: u64,
    pub used_percent: f32,
}

pub trait MemoryMonitor {
    /// `None` when the platform can't report memory.
    fn sample(&mut self) -> Option<MemorySample>;
}

pub struct SystemMemory {
    sys: System,
}

impl SystemMemory {
    pub fn new() -> Self {
        SystemMemory { sys: System::new() }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemory {
    fn sample(&mut self) -> Option<MemorySample> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return None;
        }
        let available = self.sys.available_memory().min(total);
        Some(MemorySample {
            available_mb: available / (1024 * 1024),
            used_percent: (total - available) as f32 * 100.0 / total as f32,
        })
    }
}

/// Reports a fixed amount of free memory.
#[cfg(test)]
#[derive(Clone, Copy, Debug)]
pub struct FixedMemory(pub u64);

#[cfg(test)]
impl MemoryMonitor for FixedMemory {
    fn sample(&mut self) -> Option<MemorySample> {
        Some(MemorySample {
            available_mb: self.0,
            used_percent: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sample_is_sane() {
        let mut monitor = SystemMemory::new();
        if let Some(s) = monitor.sample() {
            assert!((0.0..=100.0).contains(&s.used_percent));
        }
    }
}

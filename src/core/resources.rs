//! Process resource counters
//!
//! CPU time and peak RSS come from `getrusage(RUSAGE_SELF)`. Both are
//! process-wide: with several backends in flight, a record's CPU and memory
//! deltas include work done for its siblings.

use std::time::Duration;

/// Point-in-time reading of the process counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// User plus system CPU time
    pub cpu: Duration,
    /// High-water mark of resident memory
    pub max_rss_bytes: u64,
}

impl ResourceSnapshot {
    #[cfg(unix)]
    pub fn now() -> Self {
        // SAFETY: rusage is plain old data and getrusage only writes into it
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if rc != 0 {
            return Self::default();
        }

        let timeval = |tv: libc::timeval| {
            Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
        };

        // ru_maxrss is bytes on macOS, kilobytes elsewhere
        let rss_unit: u64 = if cfg!(target_os = "macos") { 1 } else { 1024 };

        Self {
            cpu: timeval(usage.ru_utime) + timeval(usage.ru_stime),
            max_rss_bytes: (usage.ru_maxrss.max(0) as u64).saturating_mul(rss_unit),
        }
    }

    #[cfg(not(unix))]
    pub fn now() -> Self {
        Self::default()
    }

    /// CPU time spent since `earlier`
    pub fn cpu_since(&self, earlier: &ResourceSnapshot) -> Duration {
        self.cpu.saturating_sub(earlier.cpu)
    }

    /// Growth of the peak RSS since `earlier`; zero when the peak did not move
    pub fn peak_mem_delta_since(&self, earlier: &ResourceSnapshot) -> u64 {
        self.max_rss_bytes.saturating_sub(earlier.max_rss_bytes)
    }
}

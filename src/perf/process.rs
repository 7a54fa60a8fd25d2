//! Process resource sampling for the performance tracker.
//!
//! CPU time comes from `getrusage` on Unix; resident memory from procfs on
//! Linux. A metric the platform can't provide is recorded as zero and logged
//! once at debug level; wall-clock runtime is always measured.

use std::sync::Once;
use std::time::Instant;
use tracing::debug;

static CPU_UNAVAILABLE: Once = Once::new();
static RSS_UNAVAILABLE: Once = Once::new();

/// Point-in-time view of this process.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    pub at: Instant,
    /// User + system CPU time consumed so far, in seconds
    pub cpu_secs: f64,
    /// Resident set size in MB
    pub rss_mb: f64,
}

impl ResourceSample {
    pub fn now() -> Self {
        ResourceSample {
            at: Instant::now(),
            cpu_secs: or_zero(cpu_time_secs(), &CPU_UNAVAILABLE, "CPU time"),
            rss_mb: or_zero(rss_mb(), &RSS_UNAVAILABLE, "Resident memory"),
        }
    }

    /// Wall-clock seconds, CPU percent and RSS delta (MB) between two samples.
    pub fn delta(&self, end: &ResourceSample) -> (f64, f64, f64) {
        let runtime = end.at.duration_since(self.at).as_secs_f64();
        let cpu_used = (end.cpu_secs - self.cpu_secs).max(0.0);
        let cpu_percent = if runtime > 0.0 {
            cpu_used / runtime * 100.0
        } else {
            0.0
        };
        (runtime, cpu_percent, end.rss_mb - self.rss_mb)
    }
}

fn or_zero(value: Option<f64>, once: &Once, what: &str) -> f64 {
    value.unwrap_or_else(|| {
        once.call_once(|| debug!("{} sampling unavailable, recording 0", what));
        0.0
    })
}

#[cfg(unix)]
fn cpu_time_secs() -> Option<f64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the struct it is handed.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: zero-initialised and filled in on success.
    let usage = unsafe { usage.assume_init() };
    let secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some(secs(usage.ru_utime) + secs(usage.ru_stime))
}

#[cfg(not(unix))]
fn cpu_time_secs() -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn rss_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024.0)
}

#[cfg(not(target_os = "linux"))]
fn rss_mb() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn delta_is_non_negative_for_runtime_and_cpu() {
        let start = ResourceSample::now();
        std::thread::sleep(Duration::from_millis(5));
        let end = ResourceSample::now();
        let (runtime, cpu, _mem) = start.delta(&end);
        assert!(runtime >= 0.005);
        assert!(cpu >= 0.0);
    }

    #[test]
    fn cpu_percent_from_synthetic_samples() {
        let at = Instant::now();
        let start = ResourceSample { at, cpu_secs: 1.0, rss_mb: 50.0 };
        let end = ResourceSample {
            at: at + Duration::from_secs(2),
            cpu_secs: 2.0,
            rss_mb: 48.5,
        };
        let (runtime, cpu, mem) = start.delta(&end);
        approx::assert_relative_eq!(runtime, 2.0, epsilon = 1e-9);
        approx::assert_relative_eq!(cpu, 50.0, epsilon = 1e-9);
        approx::assert_relative_eq!(mem, -1.5, epsilon = 1e-9);
    }

    #[test]
    fn unavailable_metrics_record_zero() {
        let once = Once::new();
        assert_eq!(or_zero(None, &once, "test"), 0.0);
        assert!(once.is_completed());
        assert_eq!(or_zero(Some(3.5), &Once::new(), "test"), 3.5);
    }

    #[cfg(unix)]
    #[test]
    fn cpu_time_grows_with_work() {
        let before = cpu_time_secs().unwrap();
        let mut x = 0u64;
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(30) {
            x = std::hint::black_box(x.wrapping_add(1));
        }
        assert!(cpu_time_secs().unwrap() > before);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_memory_is_readable() {
        assert!(rss_mb().unwrap() > 0.0);
    }
}

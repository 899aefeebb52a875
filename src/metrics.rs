/// Live metrics for the TUI visualizer.
///
/// While a run is in progress the device writes a JSON snapshot to
/// METRICS_PATH every `metrics_interval` cycles. The viz binary polls this
/// file and re-renders the dashboard. Writes are atomic (write to .tmp then
/// rename) to avoid torn reads.
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const METRICS_PATH: &str = "/tmp/ndrsim_live.json";

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LiveMetrics {
    /// "idle" | "running" | "suspended" | "complete"
    pub status: String,
    pub kernel_name: String,
    pub placement: String,
    /// Global size [x, y, z]
    pub global: [u32; 3],
    /// Local (work-group) size [x, y, z]
    pub local: [u32; 3],
    /// Current simulated cycle
    pub cycle: u64,
    pub work_groups_total: usize,
    pub work_groups_pending: usize,
    pub work_groups_done: usize,
    pub idle_compute_units: usize,
    pub busy_compute_units: usize,
    /// Work-group assigned to each compute unit, indexed by CU id
    pub cu_work_group: Vec<Option<usize>>,
    /// Pipeline slots in flight per compute unit, indexed by CU id
    #[serde(default)]
    pub cu_slots_in_flight: Vec<usize>,
    pub instructions_retired: u64,
    /// Unix timestamp in ms when this snapshot was written
    pub timestamp_ms: u64,
}

impl LiveMetrics {
    /// Fraction of work-groups done, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.work_groups_total == 0 {
            return 0.0;
        }
        self.work_groups_done as f64 / self.work_groups_total as f64
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

/// Atomically write metrics to METRICS_PATH.
pub fn write_metrics(metrics: &LiveMetrics) {
    write_metrics_to(Path::new(METRICS_PATH), metrics);
}

/// Atomically write metrics to `path`. Failures are ignored: the viewer is
/// best-effort and must never affect the simulation.
pub fn write_metrics_to(path: &Path, metrics: &LiveMetrics) {
    if let Ok(json) = serde_json::to_string(metrics) {
        let tmp = path.with_extension("json.tmp");
        if std::fs::write(&tmp, &json).is_ok() {
            let _ = std::fs::rename(&tmp, path);
        }
    }
}

/// Read the latest metrics snapshot. Returns None if the file doesn't exist
/// or can't be parsed (e.g. no simulation has run yet).
pub fn read_metrics() -> Option<LiveMetrics> {
    read_metrics_from(Path::new(METRICS_PATH))
}

pub fn read_metrics_from(path: &Path) -> Option<LiveMetrics> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Returns current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_write_and_read() {
        let path = std::env::temp_dir().join(format!("ndrsim-live-{}.json", std::process::id()));
        let metrics = LiveMetrics {
            status: "running".into(),
            cycle: 42,
            work_groups_total: 4,
            work_groups_done: 1,
            cu_work_group: vec![Some(3), None],
            ..Default::default()
        };
        write_metrics_to(&path, &metrics);
        let back = read_metrics_from(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, Some(metrics));
    }

    #[test]
    fn missing_file_reads_as_none() {
        assert!(read_metrics_from(Path::new("/nonexistent/ndrsim.json")).is_none());
    }

    #[test]
    fn progress_handles_empty_ndrange() {
        assert_eq!(LiveMetrics::default().progress(), 0.0);
    }
}

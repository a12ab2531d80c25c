use super::asset::{Asset, MetricSamples, MonitorError};
use std::collections::BTreeMap;
use std::path::Path;

const STATUS_PATH: &str = "/proc/self/status";

/// Resident memory of the current process, from `/proc/self/status`.
#[derive(Debug, Default)]
pub struct ProcessMemory {
    samples: MetricSamples,
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Extracts `VmRSS` in MiB from the contents of a proc status file.
pub fn parse_vm_rss(status: &str) -> Option<f64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024.0)
}

impl Asset for ProcessMemory {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        Path::new(STATUS_PATH).exists()
    }

    fn sample(&mut self) -> Result<(), MonitorError> {
        let status = std::fs::read_to_string(STATUS_PATH).map_err(|source| MonitorError::Io {
            path: STATUS_PATH.to_string(),
            source,
        })?;
        let rss = parse_vm_rss(&status)
            .ok_or_else(|| MonitorError::Parse(format!("{STATUS_PATH}: no VmRSS line")))?;
        self.samples.push("proc.memory.rssMB", rss);
        Ok(())
    }

    fn aggregate(&self) -> BTreeMap<String, f64> {
        self.samples.average()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

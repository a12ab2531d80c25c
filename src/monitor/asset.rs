use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed {0}")]
    Parse(String),
}

/// One source of system metrics, sampled on its own task.
pub trait Asset: Send + 'static {
    fn name(&self) -> &str;

    /// Whether the asset can be sampled on this machine at all.
    fn is_available(&self) -> bool;

    /// Takes one sample and keeps it until the next `clear`.
    fn sample(&mut self) -> Result<(), MonitorError>;

    /// Averages of everything sampled since the last `clear`.
    fn aggregate(&self) -> BTreeMap<String, f64>;

    fn clear(&mut self);
}

/// Per-metric sample storage with averaging.
#[derive(Debug, Default, Clone)]
pub struct MetricSamples {
    samples: BTreeMap<String, Vec<f64>>,
}

impl MetricSamples {
    pub fn push(&mut self, name: &str, value: f64) {
        self.samples.entry(name.to_string()).or_default().push(value);
    }

    pub fn average(&self) -> BTreeMap<String, f64> {
        self.samples
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.clone(), values.iter().sum::<f64>() / values.len() as f64))
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.values().all(Vec::is_empty)
    }
}

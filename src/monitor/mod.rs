//! Periodic system-resource sampling.
//!
//! Every [`Asset`] is sampled on its own task. Averages are published as
//! `stats` records with a non-blocking send, so a slow consumer costs
//! samples rather than stalling the sampling loop.

mod asset;
mod memory;

pub use asset::{Asset, MetricSamples, MonitorError};
pub use memory::{ProcessMemory, parse_vm_rss};

use crate::domain::Record;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub sampling_interval: Duration,
    pub samples_to_average: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_interval: Duration::from_secs(2),
            samples_to_average: 15,
        }
    }
}

pub struct SystemMonitor {
    config: MonitorConfig,
    assets: Vec<Box<dyn Asset>>,
    records: mpsc::Sender<Record>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SystemMonitor {
    pub fn new(config: MonitorConfig, records: mpsc::Sender<Record>) -> Self {
        Self {
            config,
            assets: Vec::new(),
            records,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Monitor with the assets built into this crate.
    pub fn with_default_assets(config: MonitorConfig, records: mpsc::Sender<Record>) -> Self {
        let mut monitor = Self::new(config, records);
        monitor.add_asset(Box::new(ProcessMemory::new()));
        monitor
    }

    pub fn add_asset(&mut self, asset: Box<dyn Asset>) {
        self.assets.push(asset);
    }

    /// Spawns one sampling task per available asset.
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!("system monitor disabled");
            return;
        }
        for asset in self.assets.drain(..) {
            if !asset.is_available() {
                debug!(asset = asset.name(), "asset not available, skipping");
                continue;
            }
            self.handles.push(tokio::spawn(monitor_asset(
                asset,
                self.config.clone(),
                self.records.clone(),
                self.cancel.child_token(),
            )));
        }
        info!(assets = self.handles.len(), "system monitor started");
    }

    /// Stops sampling and waits for every asset task.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "monitor task panicked");
            }
        }
    }
}

async fn monitor_asset(
    mut asset: Box<dyn Asset>,
    config: MonitorConfig,
    records: mpsc::Sender<Record>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.sampling_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let samples_to_average = config.samples_to_average.max(1);
    let mut samples = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = asset.sample() {
                    warn!(asset = asset.name(), error = %e, "failed to sample asset");
                    continue;
                }
                samples += 1;
                if samples >= samples_to_average {
                    publish(asset.as_mut(), &records);
                    samples = 0;
                }
            }
        }
    }

    if samples > 0 {
        publish(asset.as_mut(), &records);
    }
}

fn publish(asset: &mut dyn Asset, records: &mpsc::Sender<Record>) {
    let metrics = asset.aggregate();
    asset.clear();
    if metrics.is_empty() {
        return;
    }
    match records.try_send(Record::stats(metrics, Utc::now())) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(asset = asset.name(), "record queue full, dropping system metrics");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(asset = asset.name(), "record queue closed");
        }
    }
}

//! Poll-and-record cycle
//!
//! Owns the sampler and the history store. Periodic ticks and user actions
//! both go through the same lock, so they never interleave.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Config;
use crate::device::PlugDevice;
use crate::error::Result;
use crate::history::{HistoryRecord, HistoryStore};
use crate::sampler::{AccumulatorState, Polled, Sample, Sampler};

pub type SharedMonitor = Arc<Mutex<Monitor>>;

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub sample: Sample,
    pub warning: Option<String>,
    pub appended: bool,
    pub history_len: usize,
}

pub struct Monitor {
    sampler: Sampler,
    store: HistoryStore,
    latest: Option<Polled>,
}

impl Monitor {
    pub fn new(sampler: Sampler, store: HistoryStore) -> Self {
        Self {
            sampler,
            store,
            latest: None,
        }
    }

    /// Open the history file and resume the accumulator from its last row.
    pub fn from_config(config: &Config, device: Arc<dyn PlugDevice>) -> Result<Self> {
        let store = HistoryStore::open(&config.history.path, config.history.min_spacing())?;
        let state = AccumulatorState::resume_from(store.last(), Local::now());
        tracing::info!(
            energy_kwh = state.accumulated_kwh,
            rows = store.rows().len(),
            "accumulator resumed"
        );
        let sampler = Sampler::new(device, config.tariff.unit_price, state);
        Ok(Self::new(sampler, store))
    }

    pub fn into_shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Local::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Local>) -> TickReport {
        let polled = self.sampler.sample_at(now).await;
        let appended = self.store.append(&polled.sample);

        let report = TickReport {
            sample: polled.sample.clone(),
            warning: polled.warning.clone(),
            appended,
            history_len: self.store.rows().len(),
        };
        self.latest = Some(polled);
        report
    }

    /// Switch the plug, then run a fresh tick so the change shows up at once.
    pub async fn set_power(&mut self, on: bool) -> Result<TickReport> {
        self.sampler.set_power(on).await?;
        Ok(self.tick().await)
    }

    pub fn latest(&self) -> Option<&Polled> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> &[HistoryRecord] {
        self.store.rows()
    }

    pub fn history_csv(&self) -> Result<Vec<u8>> {
        self.store.to_csv()
    }

    pub fn unit_price(&self) -> f64 {
        self.sampler.unit_price()
    }

    pub fn state(&self) -> &AccumulatorState {
        self.sampler.state()
    }
}

/// Tick every `period` until the task is aborted. The first tick runs at once.
pub async fn run(monitor: SharedMonitor, period: Duration) {
    tracing::info!("Monitor loop started (interval: {}s)", period.as_secs());

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let report = monitor.lock().await.tick().await;
        match &report.warning {
            Some(w) => tracing::warn!(warning = %w, "tick completed with degraded sample"),
            None => tracing::info!(
                power_w = report.sample.power_watts,
                energy_kwh = report.sample.cumulative_energy_kwh,
                cost = report.sample.cumulative_cost,
                appended = report.appended,
                "tick completed"
            ),
        }
    }
}

//! Telemetry sampler: turns plug register snapshots into samples and
//! integrates power over time into energy and cost.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::device::{DeviceStatus, PlugDevice};
use crate::error::Result;
use crate::history::HistoryRecord;

pub const POWER_DIVISOR: f64 = 10.0;
pub const VOLTAGE_DIVISOR: f64 = 10.0;
/// Raw current register to amps
pub const CURRENT_DIVISOR: f64 = 1000.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Instantaneous readings in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub power_on: bool,
    pub power_watts: f64,
    pub voltage_volts: f64,
    pub current_milliamps: f64,
}

impl From<DeviceStatus> for Reading {
    fn from(status: DeviceStatus) -> Self {
        let current_amps = status.current_raw / CURRENT_DIVISOR;
        Self {
            power_on: status.power_on,
            power_watts: status.power_raw / POWER_DIVISOR,
            voltage_volts: status.voltage_raw / VOLTAGE_DIVISOR,
            current_milliamps: current_amps * 1000.0,
        }
    }
}

/// One polling result plus derived cumulative metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub power_on: bool,
    pub power_watts: f64,
    pub voltage_volts: f64,
    pub current_milliamps: f64,
    pub cumulative_energy_kwh: f64,
    pub cumulative_cost: f64,
    pub on_duration_minutes: i64,
}

/// Running totals carried from one tick to the next.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccumulatorState {
    pub last_update_time: Option<DateTime<Local>>,
    pub accumulated_kwh: f64,
    pub on_time: Option<DateTime<Local>>,
    pub duration_minutes: i64,
}

impl AccumulatorState {
    /// Resume from the most recent persisted row.
    ///
    /// Energy continues from the row's total. If the plug was on when the row
    /// was written, the on-time is reconstructed from its duration. Integration
    /// restarts at `now`; time the process was down is never integrated.
    pub fn resume_from(last: Option<&HistoryRecord>, now: DateTime<Local>) -> Self {
        let Some(row) = last else {
            return Self {
                last_update_time: Some(now),
                ..Default::default()
            };
        };

        // A duration that cannot be placed on the calendar is dropped.
        let on_time = (row.duration_min > 0)
            .then(|| chrono::Duration::try_minutes(row.duration_min))
            .flatten()
            .and_then(|d| row.time.checked_sub_signed(d));
        let duration_minutes = if on_time.is_some() { row.duration_min } else { 0 };

        Self {
            last_update_time: Some(now),
            accumulated_kwh: row.energy_kwh.max(0.0),
            on_time,
            duration_minutes,
        }
    }

    /// Fold one reading taken at `now` into the state.
    ///
    /// Energy uses the left-endpoint rule: the current power is assumed to
    /// have held since the previous update. A zeroed reading (device
    /// unreachable) therefore adds nothing for the elapsed interval.
    pub fn advance(
        &self,
        reading: Reading,
        now: DateTime<Local>,
        unit_price: f64,
    ) -> (Sample, AccumulatorState) {
        let elapsed_hours = self
            .last_update_time
            .map(|last| (now - last).num_milliseconds() as f64 / MILLIS_PER_HOUR)
            .unwrap_or(0.0)
            .max(0.0);

        let incremental_kwh = ((reading.power_watts / 1000.0) * elapsed_hours).max(0.0);
        let accumulated_kwh = self.accumulated_kwh + incremental_kwh;

        let (on_time, duration_minutes) = if reading.power_on {
            match self.on_time {
                Some(since) => (Some(since), (now - since).num_minutes().max(0)),
                None => (Some(now), 0),
            }
        } else {
            (None, 0)
        };

        let sample = Sample {
            timestamp: now,
            power_on: reading.power_on,
            power_watts: reading.power_watts,
            voltage_volts: reading.voltage_volts,
            current_milliamps: reading.current_milliamps,
            cumulative_energy_kwh: accumulated_kwh,
            cumulative_cost: accumulated_kwh * unit_price,
            on_duration_minutes: duration_minutes,
        };

        let next = AccumulatorState {
            last_update_time: Some(now),
            accumulated_kwh,
            on_time,
            duration_minutes,
        };

        (sample, next)
    }
}

/// Result of one poll. `warning` is set when the device could not be read
/// and the sample carries zeroed readings.
#[derive(Debug, Clone, Serialize)]
pub struct Polled {
    pub sample: Sample,
    pub warning: Option<String>,
}

pub struct Sampler {
    device: Arc<dyn PlugDevice>,
    unit_price: f64,
    state: AccumulatorState,
}

impl Sampler {
    pub fn new(device: Arc<dyn PlugDevice>, unit_price: f64, state: AccumulatorState) -> Self {
        Self {
            device,
            unit_price,
            state,
        }
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub async fn sample(&mut self) -> Polled {
        self.sample_at(Local::now()).await
    }

    /// Poll the device and advance the accumulator as of `now`.
    /// Device failures never escape; they degrade to a zeroed reading.
    pub async fn sample_at(&mut self, now: DateTime<Local>) -> Polled {
        let (reading, warning) = match self.device.status().await {
            Ok(status) => (Reading::from(status), None),
            Err(e) => {
                warn!(error = %e, "device status query failed; recording zeroed sample");
                (Reading::default(), Some(e.to_string()))
            }
        };

        let (sample, next) = self.state.advance(reading, now, self.unit_price);
        self.state = next;

        debug!(
            power_on = sample.power_on,
            power_w = sample.power_watts,
            energy_kwh = sample.cumulative_energy_kwh,
            duration_min = sample.on_duration_minutes,
            "sampled plug"
        );

        Polled { sample, warning }
    }

    /// Switch the plug. Accumulator state is left alone either way.
    pub async fn set_power(&self, on: bool) -> Result<()> {
        let result = if on {
            self.device.turn_on().await
        } else {
            self.device.turn_off().await
        };

        match &result {
            Ok(()) => info!("device turned {}", if on { "ON" } else { "OFF" }),
            Err(e) => warn!(error = %e, on, "device command failed"),
        }
        result
    }
}

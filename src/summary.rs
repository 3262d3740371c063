//! Descriptive statistics and correlations over the history table.

use serde::Serialize;
use std::str::FromStr;

use crate::error::AppError;
use crate::history::HistoryRecord;

/// Numeric history columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    #[serde(rename = "Current (mA)")]
    Current,
    #[serde(rename = "Voltage (V)")]
    Voltage,
    #[serde(rename = "Power (W)")]
    Power,
    #[serde(rename = "Energy (kWh)")]
    Energy,
    #[serde(rename = "Cost (BDT)")]
    Cost,
    #[serde(rename = "Duration (min)")]
    Duration,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Current,
        Metric::Voltage,
        Metric::Power,
        Metric::Energy,
        Metric::Cost,
        Metric::Duration,
    ];

    pub fn value(self, row: &HistoryRecord) -> f64 {
        match self {
            Metric::Current => row.current_ma,
            Metric::Voltage => row.voltage_v,
            Metric::Power => row.power_w,
            Metric::Energy => row.energy_kwh,
            Metric::Cost => row.cost,
            Metric::Duration => row.duration_min as f64,
        }
    }

    pub fn column(self, rows: &[HistoryRecord]) -> Vec<f64> {
        rows.iter().map(|r| self.value(r)).collect()
    }
}

impl FromStr for Metric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" => Ok(Metric::Current),
            "voltage" => Ok(Metric::Voltage),
            "power" => Ok(Metric::Power),
            "energy" => Ok(Metric::Energy),
            "cost" => Ok(Metric::Cost),
            "duration" => Ok(Metric::Duration),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown metric: {}. Supported: current, voltage, power, energy, cost, duration",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub metric: Metric,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    #[serde(rename = "25%")]
    pub p25: Option<f64>,
    #[serde(rename = "50%")]
    pub p50: Option<f64>,
    #[serde(rename = "75%")]
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    pub fn compute(metric: Metric, values: &[f64]) -> Self {
        let count = values.len();
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mean = (count > 0).then(|| values.iter().sum::<f64>() / count as f64);
        let std = mean.filter(|_| count > 1).map(|m| {
            let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });

        Self {
            metric,
            count,
            mean,
            std,
            min: sorted.first().copied(),
            p25: quantile(&sorted, 0.25),
            p50: quantile(&sorted, 0.50),
            p75: quantile(&sorted, 0.75),
            max: sorted.last().copied(),
        }
    }
}

/// Linear-interpolated quantile of already sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Pearson correlation. `None` with fewer than two points or zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
    pub metrics: Vec<Metric>,
    /// Row-major; `matrix[i][j]` correlates `metrics[i]` with `metrics[j]`.
    pub matrix: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub rows: usize,
    pub columns: Vec<ColumnStats>,
    pub correlation: Correlation,
}

pub fn summarize(rows: &[HistoryRecord]) -> Summary {
    let columns: Vec<Vec<f64>> = Metric::ALL.iter().map(|m| m.column(rows)).collect();

    let stats = Metric::ALL
        .iter()
        .zip(&columns)
        .map(|(m, values)| ColumnStats::compute(*m, values))
        .collect();

    let matrix = columns
        .iter()
        .map(|x| columns.iter().map(|y| pearson(x, y)).collect())
        .collect();

    Summary {
        rows: rows.len(),
        columns: stats,
        correlation: Correlation {
            metrics: Metric::ALL.to_vec(),
            matrix,
        },
    }
}

//! Downsampled sample history mirrored to a CSV file.

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize, Serializer};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::sampler::Sample;

pub const HEADER: [&str; 7] = [
    "Time",
    "Current (mA)",
    "Voltage (V)",
    "Power (W)",
    "Energy (kWh)",
    "Cost (BDT)",
    "Duration (min)",
];

/// Naive local wall-clock time, as earlier files were written. A repeated
/// hour at a DST fall-back is resolved against the previous row on read.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// One persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub time: DateTime<Local>,
    pub current_ma: f64,
    pub voltage_v: f64,
    pub power_w: f64,
    pub energy_kwh: f64,
    pub cost: f64,
    pub duration_min: i64,
}

impl From<&Sample> for HistoryRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            time: sample.timestamp,
            current_ma: sample.current_milliamps,
            voltage_v: sample.voltage_volts,
            power_w: sample.power_watts,
            energy_kwh: sample.cumulative_energy_kwh,
            cost: sample.cumulative_cost,
            duration_min: sample.on_duration_minutes,
        }
    }
}

/// File layout of a row. Field order must match `HEADER`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Current (mA)")]
    current_ma: f64,
    #[serde(rename = "Voltage (V)")]
    voltage_v: f64,
    #[serde(rename = "Power (W)")]
    power_w: f64,
    #[serde(rename = "Energy (kWh)")]
    energy_kwh: f64,
    #[serde(rename = "Cost (BDT)")]
    cost: f64,
    #[serde(rename = "Duration (min)", serialize_with = "whole_minutes")]
    duration_min: f64,
}

fn whole_minutes<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(*value as i64)
}

impl From<&HistoryRecord> for CsvRow {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            time: r.time.format(TIME_FORMAT).to_string(),
            current_ma: r.current_ma,
            voltage_v: r.voltage_v,
            power_w: r.power_w,
            energy_kwh: r.energy_kwh,
            cost: r.cost,
            duration_min: r.duration_min as f64,
        }
    }
}

impl HistoryRecord {
    /// Convert a file row; `previous` is the time of the row before it.
    fn from_csv(row: CsvRow, previous: Option<&DateTime<Local>>) -> Result<Self> {
        Ok(Self {
            time: parse_time_after(&row.time, previous)?,
            current_ma: row.current_ma,
            voltage_v: row.voltage_v,
            power_w: row.power_w,
            energy_kwh: row.energy_kwh,
            cost: row.cost,
            duration_min: row.duration_min as i64,
        })
    }
}

/// Parse a `Time` cell. Naive values are local wall-clock time.
pub fn parse_time(s: &str) -> Result<DateTime<Local>> {
    parse_time_after(s, None)
}

/// Like `parse_time`, but an ambiguous local time resolves to the earliest
/// instant not before `floor`.
pub fn parse_time_after(s: &str, floor: Option<&DateTime<Local>>) -> Result<DateTime<Local>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Local));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return resolve_local(Local.from_local_datetime(&naive), floor)
                .ok_or_else(|| AppError::Time(format!("nonexistent local time: {}", s)));
        }
    }
    Err(AppError::Time(format!("unrecognised timestamp: {}", s)))
}

fn resolve_local<Tz: TimeZone>(
    candidates: LocalResult<DateTime<Tz>>,
    floor: Option<&DateTime<Tz>>,
) -> Option<DateTime<Tz>> {
    match candidates {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(early, late) => match floor {
            Some(floor) if early < *floor => Some(late),
            _ => Some(early),
        },
        LocalResult::None => None,
    }
}

/// Write `rows` as CSV (header included) to `writer`.
pub fn write_csv<W: Write>(rows: &[HistoryRecord], writer: W) -> Result<W> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(HEADER)?;
    for row in rows {
        wtr.serialize(CsvRow::from(row))?;
    }
    wtr.flush()?;
    wtr.into_inner().map_err(|e| AppError::Io(e.into_error()))
}

/// Read every row of a history file.
pub fn read_csv(path: &Path) -> Result<Vec<HistoryRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize::<CsvRow>() {
        let previous = rows.last().map(|r: &HistoryRecord| r.time);
        rows.push(HistoryRecord::from_csv(result?, previous.as_ref())?);
    }
    Ok(rows)
}

/// In-memory log of accepted samples, mirrored to disk on every append.
///
/// A sample is accepted only when the log is empty or it is at least
/// `min_spacing` after the last accepted row.
pub struct HistoryStore {
    path: PathBuf,
    min_spacing: chrono::Duration,
    rows: Vec<HistoryRecord>,
}

impl HistoryStore {
    /// Open the store, seeding it from `path` when the file exists.
    pub fn open(path: impl Into<PathBuf>, min_spacing: chrono::Duration) -> Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            let rows = read_csv(&path)?;
            info!(path = %path.display(), rows = rows.len(), "loaded history");
            rows
        } else {
            info!(path = %path.display(), "no history file yet; starting empty");
            Vec::new()
        };

        Ok(Self {
            path,
            min_spacing,
            rows,
        })
    }

    pub fn rows(&self) -> &[HistoryRecord] {
        &self.rows
    }

    pub fn last(&self) -> Option<&HistoryRecord> {
        self.rows.last()
    }

    pub fn accepts(&self, at: DateTime<Local>) -> bool {
        match self.rows.last() {
            None => true,
            Some(last) => at - last.time >= self.min_spacing,
        }
    }

    /// Append `sample` if the spacing rule allows it, persisting the full log.
    /// Returns whether the sample was appended. A failed write is logged and
    /// the in-memory log is kept; the next append retries the whole file.
    pub fn append(&mut self, sample: &Sample) -> bool {
        if !self.accepts(sample.timestamp) {
            debug!(ts = %sample.timestamp, "skipping sample due to spacing filter");
            return false;
        }

        self.rows.push(HistoryRecord::from(sample));
        if let Err(e) = self.persist() {
            error!(
                path = %self.path.display(),
                error = %e,
                "failed to persist history; keeping in-memory log"
            );
        }
        true
    }

    /// Offer a sample and return the full table either way.
    pub fn record(&mut self, sample: &Sample) -> &[HistoryRecord] {
        self.append(sample);
        &self.rows
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        write_csv(&self.rows, Vec::new())
    }

    /// Snapshot the log to a sibling temp file, then rename it into place.
    /// The temp file is removed if any step fails.
    fn persist(&self) -> Result<()> {
        let tmp = tmp_path(&self.path);
        let file = File::create(&tmp)?;
        let snapshot = write_csv(&self.rows, file)
            .and_then(|file| file.sync_all().map_err(AppError::from))
            .and_then(|()| fs::rename(&tmp, &self.path).map_err(AppError::from));
        if let Err(e) = snapshot {
            fs::remove_file(&tmp).ok();
            return Err(e);
        }
        debug!(path = %self.path.display(), rows = self.rows.len(), "history persisted");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

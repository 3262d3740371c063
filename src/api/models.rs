use chrono::{DateTime, Local};
use serde::Serialize;

use crate::sampler::Polled;
use crate::summary::Metric;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Most recent poll, if any tick has run yet
    pub latest: Option<Polled>,
    pub unit_price: f64,
    pub history_len: usize,
}

#[derive(Debug, Serialize)]
pub struct SeriesPoint {
    pub time: DateTime<Local>,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub metric: Metric,
    pub points: Vec<SeriesPoint>,
}

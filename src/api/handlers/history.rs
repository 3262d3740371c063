use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};

use crate::{
    api::models::{SeriesPoint, SeriesResponse},
    error::Result,
    history::HistoryRecord,
    summary::{summarize, Metric, Summary},
};

use super::AppState;

/// GET /api/v1/history
pub async fn get_history(State(state): State<AppState>) -> Json<Vec<HistoryRecord>> {
    let monitor = state.monitor.lock().await;
    Json(monitor.history().to_vec())
}

/// GET /api/v1/history/{metric}
/// One column of the history as a time series
pub async fn get_series(
    State(state): State<AppState>,
    Path(metric): Path<String>,
) -> Result<Json<SeriesResponse>> {
    let metric: Metric = metric.parse()?;
    let monitor = state.monitor.lock().await;

    let points = monitor
        .history()
        .iter()
        .map(|row| SeriesPoint {
            time: row.time,
            value: metric.value(row),
        })
        .collect();

    Ok(Json(SeriesResponse { metric, points }))
}

/// GET /api/v1/history.csv
pub async fn download_csv(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let body = state.monitor.lock().await.history_csv()?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"energy_history.csv\"",
            ),
        ],
        body,
    ))
}

/// GET /api/v1/summary
pub async fn get_summary(State(state): State<AppState>) -> Json<Summary> {
    let monitor = state.monitor.lock().await;
    Json(summarize(monitor.history()))
}

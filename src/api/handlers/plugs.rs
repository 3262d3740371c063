use axum::{extract::State, Json};

use crate::{api::models::StatusResponse, error::Result, monitor::TickReport};

use super::AppState;

/// GET /api/v1/status
/// Latest sample as of the last tick; does not poll the device
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let monitor = state.monitor.lock().await;

    Json(StatusResponse {
        latest: monitor.latest().cloned(),
        unit_price: monitor.unit_price(),
        history_len: monitor.history().len(),
    })
}

/// POST /api/v1/refresh
/// Poll the device and record the sample now
pub async fn refresh(State(state): State<AppState>) -> Json<TickReport> {
    let report = state.monitor.lock().await.tick().await;
    Json(report)
}

/// POST /api/v1/plug/on
pub async fn turn_on(State(state): State<AppState>) -> Result<Json<TickReport>> {
    switch(state, true).await
}

/// POST /api/v1/plug/off
pub async fn turn_off(State(state): State<AppState>) -> Result<Json<TickReport>> {
    switch(state, false).await
}

async fn switch(state: AppState, on: bool) -> Result<Json<TickReport>> {
    let report = state.monitor.lock().await.set_power(on).await?;
    Ok(Json(report))
}

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers::{health, history, plugs, AppState};

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/status", get(plugs::get_status))
        .route("/api/v1/refresh", post(plugs::refresh))
        .route("/api/v1/plug/on", post(plugs::turn_on))
        .route("/api/v1/plug/off", post(plugs::turn_off))
        .route("/api/v1/history", get(history::get_history))
        .route("/api/v1/history.csv", get(history::download_csv))
        .route("/api/v1/history/{metric}", get(history::get_series))
        .route("/api/v1/summary", get(history::get_summary));

    let public_routes = Router::new().route("/health", get(health::health_check));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

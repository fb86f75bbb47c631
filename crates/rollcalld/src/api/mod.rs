//! HTTP surface: the recognition endpoint plus read-only attendance reports.

pub mod dto;
pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use rollcall_core::Pipeline;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::capture::IMAGES_ROUTE;

/// Facts about the running service that the pipeline does not own.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub gallery_size: usize,
    pub gallery_labels: usize,
    pub workers: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub info: Arc<ServiceInfo>,
}

pub struct RouterOptions<'a> {
    /// Directory served under `/images`.
    pub capture_dir: &'a Path,
    pub max_body_bytes: usize,
}

pub fn build_router(state: AppState, options: RouterOptions<'_>) -> Router {
    Router::new()
        .route("/recognize", post(handlers::recognize))
        .route("/health", get(handlers::status))
        .route("/api/status", get(handlers::status))
        .route("/api/today-attendance", get(handlers::today_attendance))
        .route("/api/today-active-interns", get(handlers::today_attendance))
        .route("/api/attendance-summary", get(handlers::attendance_summary))
        .route("/api/attendance-dates", get(handlers::attendance_dates))
        .route(
            "/api/attendance-dates-with-range",
            get(handlers::attendance_dates_with_range),
        )
        .route("/api/attendance-by-date/:date", get(handlers::attendance_by_date))
        .route(
            "/api/monthly-attendance/:year/:month",
            get(handlers::monthly_attendance),
        )
        .route("/api/system-start-date", get(handlers::system_start_date))
        .nest_service(IMAGES_ROUTE, ServeDir::new(options.capture_dir))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

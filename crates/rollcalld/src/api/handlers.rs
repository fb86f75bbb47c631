use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use rollcall_core::report::attendance_calendar;
use rollcall_core::{Clock, Ledger, LedgerError};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use super::dto::{
    http_status, ActiveAttendee, DateRangeResponse, DatesResponse, DayAttendee, DayResponse,
    RecognizeResponse, StartDateResponse, StatusResponse, SummaryResponse, TodayResponse,
};
use super::AppState;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::Ledger(LedgerError::InvalidMonth { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Ledger(e) => {
                tracing::error!(error = %e, "report query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// POST /recognize: raw image bytes in, attendance decision out.
pub async fn recognize(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<RecognizeResponse>) {
    let pipeline = &state.pipeline;
    match pipeline.process(Arc::from(body.as_ref())).await {
        Ok(outcome) => {
            let feedback = outcome.feedback(pipeline.cues());
            let body = RecognizeResponse::new(feedback, outcome.label(), outcome.image_url());
            (http_status(outcome.kind()), Json(body))
        }
        Err(e) => {
            tracing::error!(error = %e, "recognition request failed");
            let body = RecognizeResponse::new(e.feedback(pipeline.cues()), None, None);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

/// GET /api/status and /health
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let pipeline = &state.pipeline;
    let (today, attended) = pipeline.cache().snapshot();
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        identities: pipeline.directory().len(),
        gallery_size: state.info.gallery_size,
        gallery_labels: state.info.gallery_labels,
        workers: state.info.workers,
        audio_cues: pipeline.cues().len(),
        today,
        attended_today: attended.len(),
        extraction_faults: pipeline.extraction_faults(),
    })
}

/// GET /api/today-attendance: newest first.
pub async fn today_attendance(State(state): State<AppState>) -> ApiResult<TodayResponse> {
    let today = state.pipeline.clock().today();
    let events = state.pipeline.ledger().list_for_day(today).await?;
    let active_interns: Vec<ActiveAttendee> = events.iter().rev().map(ActiveAttendee::from).collect();
    Ok(Json(TodayResponse {
        date: today,
        total_active: active_interns.len(),
        active_interns,
    }))
}

/// GET /api/attendance-summary
pub async fn attendance_summary(State(state): State<AppState>) -> ApiResult<SummaryResponse> {
    let today = state.pipeline.clock().today();
    let events = state.pipeline.ledger().list_for_day(today).await?;
    Ok(Json(SummaryResponse {
        total_attendees: events.len(),
    }))
}

/// GET /api/attendance-dates: newest first.
pub async fn attendance_dates(State(state): State<AppState>) -> ApiResult<DatesResponse> {
    let dates = state.pipeline.ledger().attendance_days().await?;
    Ok(Json(DatesResponse {
        total_dates: dates.len(),
        dates,
    }))
}

/// GET /api/attendance-dates-with-range: every day since the first event.
pub async fn attendance_dates_with_range(State(state): State<AppState>) -> ApiResult<DateRangeResponse> {
    let ledger = state.pipeline.ledger();
    let Some(first) = ledger.first_day().await? else {
        return Ok(Json(DateRangeResponse {
            date_range: Vec::new(),
            total_dates: 0,
        }));
    };
    let attended: BTreeSet<NaiveDate> = ledger.attendance_days().await?.into_iter().collect();
    let today = state.pipeline.clock().today();
    Ok(Json(DateRangeResponse {
        date_range: attendance_calendar(first, today, &attended),
        total_dates: attended.len(),
    }))
}

/// GET /api/attendance-by-date/:date
pub async fn attendance_by_date(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<DayResponse> {
    let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date {raw:?}, expected YYYY-MM-DD")))?;
    let events = state.pipeline.ledger().list_for_day(date).await?;
    let attendees: Vec<DayAttendee> = events.iter().map(DayAttendee::from).collect();
    Ok(Json(DayResponse {
        date,
        total_attendees: attendees.len(),
        attendees,
    }))
}

/// GET /api/monthly-attendance/:year/:month
pub async fn monthly_attendance(
    State(state): State<AppState>,
    Path((raw_year, raw_month)): Path<(String, String)>,
) -> ApiResult<rollcall_core::report::MonthlyAggregate> {
    let year: i32 = raw_year
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid year {raw_year:?}")))?;
    let month: u32 = raw_month
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid month {raw_month:?}, expected 1-12")))?;
    Ok(Json(state.pipeline.ledger().aggregate_by_month(year, month).await?))
}

/// GET /api/system-start-date
pub async fn system_start_date(State(state): State<AppState>) -> ApiResult<StartDateResponse> {
    let clock = state.pipeline.clock();
    let now = clock.now();
    let first = state.pipeline.ledger().first_day().await?;
    Ok(Json(StartDateResponse {
        system_start_date: first.unwrap_or(now.date_naive()),
        current_date: now,
    }))
}

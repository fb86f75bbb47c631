//! Response bodies. Field names follow the dashboard's existing contract.

use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset, NaiveDate};
use rollcall_core::report::CalendarDay;
use rollcall_core::{AttendanceEvent, CueId, Feedback, FeedbackStatus, OutcomeKind};
use serde::Serialize;

/// Status string the dashboard shows for a recorded attendee.
pub const PRESENT: &str = "Hadir";

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub status: FeedbackStatus,
    pub message: String,
    pub audio_track: Option<CueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl RecognizeResponse {
    pub fn new(feedback: Feedback, name: Option<&str>, image_url: Option<&str>) -> Self {
        Self {
            status: feedback.status,
            message: feedback.message,
            audio_track: feedback.audio_track,
            name: name.map(str::to_string),
            image_url: image_url.map(str::to_string),
        }
    }
}

/// HTTP status for each recognition outcome.
pub fn http_status(kind: OutcomeKind) -> StatusCode {
    match kind {
        OutcomeKind::Success | OutcomeKind::AlreadyAttended => StatusCode::OK,
        OutcomeKind::NoFace => StatusCode::BAD_REQUEST,
        OutcomeKind::UnknownIdentity | OutcomeKind::IdentityNotFound => StatusCode::NOT_FOUND,
        OutcomeKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub identities: usize,
    pub gallery_size: usize,
    pub gallery_labels: usize,
    pub workers: usize,
    pub audio_cues: usize,
    pub today: NaiveDate,
    pub attended_today: usize,
    pub extraction_faults: u64,
}

#[derive(Debug, Serialize)]
pub struct ActiveAttendee {
    pub name: String,
    pub jobdesk: String,
    pub recognition_time: DateTime<FixedOffset>,
    pub capture_image: Option<String>,
    pub intern_id: i64,
}

impl From<&AttendanceEvent> for ActiveAttendee {
    fn from(e: &AttendanceEvent) -> Self {
        Self {
            name: e.label.clone(),
            jobdesk: e.jobdesk(),
            recognition_time: e.recorded_at,
            capture_image: e.image_url.clone(),
            intern_id: e.identity_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TodayResponse {
    pub date: NaiveDate,
    pub total_active: usize,
    pub active_interns: Vec<ActiveAttendee>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub total_attendees: usize,
}

#[derive(Debug, Serialize)]
pub struct DatesResponse {
    pub total_dates: usize,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct DateRangeResponse {
    pub date_range: Vec<CalendarDay>,
    pub total_dates: usize,
}

#[derive(Debug, Serialize)]
pub struct DayAttendee {
    pub name: String,
    pub jobdesk: String,
    pub photo: Option<String>,
    pub recognition_time: DateTime<FixedOffset>,
    pub status: &'static str,
}

impl From<&AttendanceEvent> for DayAttendee {
    fn from(e: &AttendanceEvent) -> Self {
        Self {
            name: e.label.clone(),
            jobdesk: e.jobdesk(),
            photo: e.image_url.clone(),
            recognition_time: e.recorded_at,
            status: PRESENT,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DayResponse {
    pub date: NaiveDate,
    pub attendees: Vec<DayAttendee>,
    pub total_attendees: usize,
}

#[derive(Debug, Serialize)]
pub struct StartDateResponse {
    pub system_start_date: NaiveDate,
    pub current_date: DateTime<FixedOffset>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(http_status(OutcomeKind::Success), StatusCode::OK);
        assert_eq!(http_status(OutcomeKind::AlreadyAttended), StatusCode::OK);
        assert_eq!(http_status(OutcomeKind::NoFace), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(OutcomeKind::IdentityNotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status(OutcomeKind::UnknownIdentity), StatusCode::NOT_FOUND);
        assert_eq!(
            http_status(OutcomeKind::InternalError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_recognize_response_omits_absent_fields() {
        let body = RecognizeResponse::new(
            Feedback {
                status: FeedbackStatus::Fail,
                message: "No face detected, please try again.".into(),
                audio_track: Some(CueId::from_number(2)),
            },
            None,
            None,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["audio_track"], "0002");
        assert!(json.get("name").is_none());
        assert!(json.get("image_url").is_none());
    }
}

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face embedding vector (128-d for dlib-style models, 512-d for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Zero vectors compare as 0.0 against everything.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// A known person, as loaded from the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Directory row id.
    pub id: i64,
    /// Unique label; the classifier speaks in these.
    pub label: String,
    pub affiliation: String,
    pub category: String,
}

/// Synthetic identifier of a recorded attendance event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attendance event about to be written. Affiliation fields are copied
/// from the [`Identity`] at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendance {
    pub identity_id: i64,
    pub label: String,
    pub affiliation: String,
    pub category: String,
    pub image_url: Option<String>,
    pub recorded_at: DateTime<FixedOffset>,
}

impl NewAttendance {
    pub fn for_identity(
        identity: &Identity,
        image_url: Option<String>,
        recorded_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            identity_id: identity.id,
            label: identity.label.clone(),
            affiliation: identity.affiliation.clone(),
            category: identity.category.clone(),
            image_url,
            recorded_at,
        }
    }

    /// Civil day in the timestamp's own offset.
    pub fn day(&self) -> NaiveDate {
        self.recorded_at.date_naive()
    }

    pub fn into_event(self, id: EventId) -> AttendanceEvent {
        let day = self.day();
        AttendanceEvent {
            id,
            identity_id: self.identity_id,
            label: self.label,
            affiliation: self.affiliation,
            category: self.category,
            image_url: self.image_url,
            recorded_at: self.recorded_at,
            day,
        }
    }
}

/// A persisted attendance event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: EventId,
    pub identity_id: i64,
    pub label: String,
    pub affiliation: String,
    pub category: String,
    pub image_url: Option<String>,
    pub recorded_at: DateTime<FixedOffset>,
    pub day: NaiveDate,
}

impl AttendanceEvent {
    /// "category - affiliation", the job description shown on dashboards.
    pub fn jobdesk(&self) -> String {
        format!("{} - {}", self.category, self.affiliation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal_and_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert!(a.similarity(&Embedding::new(vec![0.0, 1.0])).abs() < 1e-6);
        assert!((a.similarity(&Embedding::new(vec![-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_day_follows_timestamp_offset() {
        // 23:30 WIB is still the 14th locally even though it is 16:30 UTC.
        let wib = FixedOffset::east_opt(7 * 3600).unwrap();
        let at = wib.with_ymd_and_hms(2025, 3, 14, 23, 30, 0).unwrap();
        let identity = Identity {
            id: 1,
            label: "Alice".into(),
            affiliation: "ITB".into(),
            category: "Backend".into(),
        };
        let new = NewAttendance::for_identity(&identity, None, at);
        assert_eq!(new.day(), NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());

        let event = new.into_event(EventId("e1".into()));
        assert_eq!(event.jobdesk(), "Backend - ITB");
    }
}

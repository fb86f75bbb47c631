//! Outcome → user-facing status, message and audio cue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Identifier of a pre-rendered audio track, e.g. `"0004"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueId(pub String);

impl CueId {
    /// Numeric track ids are rendered zero-padded to four digits.
    pub fn from_number(n: u32) -> Self {
        Self(format!("{n:04}"))
    }
}

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum CueError {
    #[error("no audio cue configured for {0}")]
    NotConfigured(String),
}

#[derive(Error, Debug)]
pub enum CueTableError {
    #[error("failed to read cue table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cue table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Cues for the outcomes that are not tied to a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericCues {
    pub already_attended: CueId,
    pub no_face: CueId,
    pub not_found: CueId,
    pub unknown_identity: CueId,
}

impl Default for GenericCues {
    fn default() -> Self {
        Self {
            already_attended: CueId::from_number(1),
            no_face: CueId::from_number(2),
            not_found: CueId::from_number(3),
            unknown_identity: CueId::from_number(3),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCue {
    Number(u32),
    Text(String),
}

/// Per-identity welcome cues plus the generic outcome cues. Read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct CueTable {
    per_label: HashMap<String, CueId>,
    generic: GenericCues,
}

impl CueTable {
    pub fn new(per_label: HashMap<String, CueId>, generic: GenericCues) -> Self {
        Self { per_label, generic }
    }

    /// Load per-label cues from a JSON object mapping label → track number
    /// (or an already formatted track string).
    pub fn from_json_file(path: &Path, generic: GenericCues) -> Result<Self, CueTableError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CueTableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_json_str(&raw, generic)?;
        tracing::info!(path = %path.display(), cues = table.len(), "audio cue table loaded");
        Ok(table)
    }

    pub fn from_json_str(raw: &str, generic: GenericCues) -> Result<Self, CueTableError> {
        let parsed: HashMap<String, RawCue> = serde_json::from_str(raw)?;
        let per_label = parsed
            .into_iter()
            .map(|(label, cue)| {
                let cue = match cue {
                    RawCue::Number(n) => CueId::from_number(n),
                    RawCue::Text(s) => CueId(s),
                };
                (label, cue)
            })
            .collect();
        Ok(Self { per_label, generic })
    }

    pub fn len(&self) -> usize {
        self.per_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_label.is_empty()
    }

    pub fn generic(&self) -> &GenericCues {
        &self.generic
    }

    pub fn welcome(&self, label: &str) -> Result<&CueId, CueError> {
        self.per_label
            .get(label)
            .ok_or_else(|| CueError::NotConfigured(label.to_string()))
    }
}

/// Outcome classes the resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    AlreadyAttended,
    NoFace,
    UnknownIdentity,
    IdentityNotFound,
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Success,
    Fail,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub status: FeedbackStatus,
    pub message: String,
    pub audio_track: Option<CueId>,
}

/// Map an outcome to its feedback. `label` is the classified identity when there is one.
///
/// A success without a configured welcome cue still reports success, just
/// without a cue: the attendance is already recorded.
pub fn resolve(kind: OutcomeKind, label: Option<&str>, cues: &CueTable) -> Feedback {
    let who = label.unwrap_or("unknown");
    let generic = cues.generic();
    let (status, message, audio_track) = match kind {
        OutcomeKind::Success => {
            let cue = match cues.welcome(who) {
                Ok(cue) => Some(cue.clone()),
                Err(e) => {
                    tracing::warn!(label = who, error = %e, "welcome cue missing; answering without audio");
                    None
                }
            };
            (FeedbackStatus::Success, format!("Attendance for {who} recorded."), cue)
        }
        OutcomeKind::AlreadyAttended => (
            FeedbackStatus::Fail,
            format!("{who} has already attended today."),
            Some(generic.already_attended.clone()),
        ),
        OutcomeKind::NoFace => (
            FeedbackStatus::Fail,
            "No face detected, please try again.".to_string(),
            Some(generic.no_face.clone()),
        ),
        OutcomeKind::UnknownIdentity => (
            FeedbackStatus::Fail,
            "Face not recognized.".to_string(),
            Some(generic.unknown_identity.clone()),
        ),
        OutcomeKind::IdentityNotFound => (
            FeedbackStatus::Fail,
            format!("Identity '{who}' was not found."),
            Some(generic.not_found.clone()),
        ),
        OutcomeKind::InternalError => (
            FeedbackStatus::Error,
            "Internal server error.".to_string(),
            None,
        ),
    };
    Feedback {
        status,
        message,
        audio_track,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CueTable {
        CueTable::from_json_str(r#"{"Alice": 4, "Bob": "0005"}"#, GenericCues::default()).unwrap()
    }

    #[test]
    fn test_cue_formatting() {
        assert_eq!(CueId::from_number(4).0, "0004");
        assert_eq!(CueId::from_number(12345).0, "12345");
    }

    #[test]
    fn test_success_uses_welcome_cue() {
        let fb = resolve(OutcomeKind::Success, Some("Alice"), &table());
        assert_eq!(fb.status, FeedbackStatus::Success);
        assert_eq!(fb.audio_track, Some(CueId("0004".into())));

        let fb = resolve(OutcomeKind::Success, Some("Bob"), &table());
        assert_eq!(fb.audio_track, Some(CueId("0005".into())));
    }

    #[test]
    fn test_success_without_cue_degrades() {
        let fb = resolve(OutcomeKind::Success, Some("Carol"), &table());
        assert_eq!(fb.status, FeedbackStatus::Success);
        assert_eq!(fb.audio_track, None);
        assert!(matches!(table().welcome("Carol"), Err(CueError::NotConfigured(_))));
    }

    #[test]
    fn test_generic_outcomes() {
        let t = table();
        let cue = |kind| resolve(kind, Some("Alice"), &t);

        let fb = cue(OutcomeKind::AlreadyAttended);
        assert_eq!((fb.status, fb.audio_track.unwrap().0), (FeedbackStatus::Fail, "0001".into()));
        let fb = cue(OutcomeKind::NoFace);
        assert_eq!((fb.status, fb.audio_track.unwrap().0), (FeedbackStatus::Fail, "0002".into()));
        let fb = cue(OutcomeKind::IdentityNotFound);
        assert_eq!((fb.status, fb.audio_track.unwrap().0), (FeedbackStatus::Fail, "0003".into()));
        let fb = cue(OutcomeKind::UnknownIdentity);
        assert_eq!((fb.status, fb.audio_track.unwrap().0), (FeedbackStatus::Fail, "0003".into()));

        let fb = cue(OutcomeKind::InternalError);
        assert_eq!(fb.status, FeedbackStatus::Error);
        assert!(fb.audio_track.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FeedbackStatus::Fail).unwrap(), "\"fail\"");
    }

    #[test]
    fn test_generic_cues_partial_override() {
        let g: GenericCues = serde_json::from_str(r#"{"unknown_identity": "0009"}"#).unwrap();
        assert_eq!(g.unknown_identity.0, "0009");
        assert_eq!(g.no_face.0, "0002");
    }
}

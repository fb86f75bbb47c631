//! Recognition pipeline: one frame in, one attendance decision out.
//!
//! Per request:
//!
//! ```text
//! RECEIVED → DETECTING → EMBEDDING → CLASSIFYING → DEDUP_CHECK → PERSISTING → DONE
//!                 └─ NO_FACE ─┘          ├─ UNKNOWN_IDENTITY        └─ ALREADY_ATTENDED
//!                                        └─ IDENTITY_NOT_FOUND
//! ```
//!
//! The ledger's `record` is authoritative for deduplication; the cache only
//! short-circuits the common repeat case and is updated after the write
//! commits.

use crate::analyzer::{AnalyzeError, FrameAnalyzer, Recognition};
use crate::cache::AttendanceCache;
use crate::capture::{CaptureError, CaptureStore};
use crate::clock::Clock;
use crate::directory::IdentityDirectory;
use crate::feedback::{resolve, CueTable, Feedback, OutcomeKind};
use crate::ledger::{Ledger, LedgerError, RecordError};
use crate::types::{AttendanceEvent, NewAttendance};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Request state, used as the `stage` field in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Detecting,
    Embedding,
    Classifying,
    DedupCheck,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "RECEIVED",
            Stage::Detecting => "DETECTING",
            Stage::Embedding => "EMBEDDING",
            Stage::Classifying => "CLASSIFYING",
            Stage::DedupCheck => "DEDUP_CHECK",
            Stage::Persisting => "PERSISTING",
            Stage::Done => "DONE",
        })
    }
}

/// Terminal result of a request that did not fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { event: AttendanceEvent },
    AlreadyAttended { label: String },
    NoFace,
    UnknownIdentity { similarity: f32 },
    IdentityNotFound { label: String },
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success { .. } => OutcomeKind::Success,
            Outcome::AlreadyAttended { .. } => OutcomeKind::AlreadyAttended,
            Outcome::NoFace => OutcomeKind::NoFace,
            Outcome::UnknownIdentity { .. } => OutcomeKind::UnknownIdentity,
            Outcome::IdentityNotFound { .. } => OutcomeKind::IdentityNotFound,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Outcome::Success { event } => Some(&event.label),
            Outcome::AlreadyAttended { label } | Outcome::IdentityNotFound { label } => Some(label),
            Outcome::NoFace | Outcome::UnknownIdentity { .. } => None,
        }
    }

    /// URL of the stored capture, for successful requests that kept one.
    pub fn image_url(&self) -> Option<&str> {
        match self {
            Outcome::Success { event } => event.image_url.as_deref(),
            _ => None,
        }
    }

    pub fn feedback(&self, cues: &CueTable) -> Feedback {
        resolve(self.kind(), self.label(), cues)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("capture is required but could not be stored: {0}")]
    CaptureRequired(#[source] CaptureError),
}

impl PipelineError {
    pub fn feedback(&self, cues: &CueTable) -> Feedback {
        resolve(OutcomeKind::InternalError, None, cues)
    }
}

/// Everything the pipeline reads or writes besides the analyzer.
pub struct PipelineContext {
    pub directory: Arc<IdentityDirectory>,
    pub ledger: Arc<dyn Ledger>,
    pub captures: Arc<dyn CaptureStore>,
    pub cues: Arc<CueTable>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Treat a failed capture write as a fault instead of recording without evidence.
    pub require_capture: bool,
}

pub struct Pipeline {
    analyzer: Arc<dyn FrameAnalyzer>,
    ctx: PipelineContext,
    cache: AttendanceCache,
    options: PipelineOptions,
    extraction_faults: AtomicU64,
}

impl Pipeline {
    /// Assemble the pipeline and warm the attendance cache from today's ledger.
    pub async fn start(
        analyzer: Arc<dyn FrameAnalyzer>,
        ctx: PipelineContext,
        options: PipelineOptions,
    ) -> Result<Self, LedgerError> {
        let today = ctx.clock.today();
        let cache = AttendanceCache::load(ctx.ledger.as_ref(), today).await?;
        Ok(Self {
            analyzer,
            ctx,
            cache,
            options,
            extraction_faults: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.ctx.directory
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ctx.ledger.as_ref()
    }

    pub fn cache(&self) -> &AttendanceCache {
        &self.cache
    }

    pub fn cues(&self) -> &CueTable {
        &self.ctx.cues
    }

    pub fn clock(&self) -> &dyn Clock {
        self.ctx.clock.as_ref()
    }

    /// Extractor faults seen since start.
    pub fn extraction_faults(&self) -> u64 {
        self.extraction_faults.load(Ordering::Relaxed)
    }

    /// Roll the cache over if the local day has changed.
    pub async fn rollover(&self) -> Result<bool, LedgerError> {
        self.cache.ensure_day(self.ledger(), self.clock().today()).await
    }

    /// Run one frame through the whole pipeline.
    pub async fn process(&self, frame: Arc<[u8]>) -> Result<Outcome, PipelineError> {
        tracing::debug!(stage = %Stage::Received, bytes = frame.len());

        let recognition = self.analyzer.analyze(Arc::clone(&frame)).await?;
        let (label, similarity) = match recognition {
            Recognition::NoFace => {
                tracing::debug!("no face in frame");
                return Ok(Outcome::NoFace);
            }
            Recognition::ExtractionFault(reason) => {
                self.extraction_faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%reason, "extractor fault; answering as no face");
                return Ok(Outcome::NoFace);
            }
            Recognition::Unknown { similarity } => {
                tracing::info!(similarity, "face not close to any enrolled identity");
                return Ok(Outcome::UnknownIdentity { similarity });
            }
            Recognition::Identified { label, similarity } => (label, similarity),
        };

        tracing::debug!(stage = %Stage::Classifying, %label, similarity);
        let Some(identity) = self.ctx.directory.lookup(&label) else {
            tracing::warn!(%label, "classifier label missing from identity directory");
            return Ok(Outcome::IdentityNotFound { label });
        };

        tracing::debug!(stage = %Stage::DedupCheck, %label);
        let now = self.ctx.clock.now();
        let today = now.date_naive();
        self.cache.ensure_day(self.ledger(), today).await?;
        if self.cache.is_marked(&label, today) {
            return Ok(Outcome::AlreadyAttended { label });
        }
        // A cache miss is not proof; another process may share the ledger.
        if self.ledger().has_attended(&label, today).await? {
            self.cache.mark(&label, today);
            return Ok(Outcome::AlreadyAttended { label });
        }

        tracing::debug!(stage = %Stage::Persisting, %label);
        let image_url = match self.ctx.captures.store(&label, now, &frame).await {
            Ok(url) => Some(url),
            Err(e) if self.options.require_capture => return Err(PipelineError::CaptureRequired(e)),
            Err(e) => {
                tracing::warn!(%label, error = %e, "capture not stored; recording without image");
                None
            }
        };

        let new = NewAttendance::for_identity(identity, image_url, now);
        match self.ledger().record(new.clone()).await {
            Ok(id) => {
                self.cache.mark(&label, today);
                tracing::info!(stage = %Stage::Done, %label, event = %id, similarity, "attendance recorded");
                Ok(Outcome::Success {
                    event: new.into_event(id),
                })
            }
            Err(RecordError::Duplicate { .. }) => {
                // Lost the race to a concurrent request for the same person.
                tracing::debug!(%label, "concurrent attendance already recorded");
                self.cache.mark(&label, today);
                Ok(Outcome::AlreadyAttended { label })
            }
            Err(RecordError::Ledger(e)) => Err(e.into()),
        }
    }
}

//! rollcall-core: Recognition-to-attendance decision pipeline.
//!
//! Turns a camera frame into at most one attendance event per identity per
//! civil day. Face detection and embedding are consumed through the
//! [`EmbeddingExtractor`] trait; storage through [`Ledger`] and
//! [`CaptureStore`]. Everything here is runtime-agnostic.

pub mod analyzer;
pub mod cache;
pub mod capture;
pub mod classifier;
pub mod clock;
pub mod directory;
pub mod extractor;
pub mod feedback;
pub mod ledger;
pub mod pipeline;
pub mod report;
pub mod types;

pub use analyzer::{analyze_frame, AnalyzeError, FrameAnalyzer, InlineAnalyzer, Recognition};
pub use cache::AttendanceCache;
pub use capture::{CaptureError, CaptureStore};
pub use classifier::{Classification, IdentityClassifier, KnnClassifier};
pub use clock::{Clock, ManualClock, SystemClock, Zone};
pub use directory::IdentityDirectory;
pub use extractor::{EmbeddingExtractor, ExtractError};
pub use feedback::{CueId, CueTable, Feedback, FeedbackStatus, GenericCues, OutcomeKind};
pub use ledger::{Ledger, LedgerError, MemoryLedger, RecordError};
pub use pipeline::{Outcome, Pipeline, PipelineContext, PipelineError, PipelineOptions, Stage};
pub use types::{AttendanceEvent, Embedding, EventId, Identity, NewAttendance};

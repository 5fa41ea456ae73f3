//! Core domain types shared by every Vitality pipeline crate.

pub mod error;
pub mod keywords;
pub mod types;
pub mod visit;

pub use error::{BlockKind, PipelineError, Result};
pub use keywords::{KeywordSets, ScheduleKeyword};
pub use types::{
    AiSchedule, AssignmentStatus, DetectedBy, Diocese, DioceseWorkAssignment, DiscoveredUrl,
    ExtractionMethod, FactType, Frequency, Parish, ParishData, ParishDirectory, PipelineWorker,
    SuppressionUrl, WorkerStatus,
};
pub use visit::{ExtractionMarks, VisitOutcome, VisitSink};

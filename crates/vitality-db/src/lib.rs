//! Postgres persistence adapter — the only writer to the store. Every call
//! is idempotent unless documented otherwise; coordinator mutations run
//! inside retried transactions.

mod coordinator;
mod loaders;
mod store;
mod upserts;
mod visits;

pub use coordinator::{ClaimedDiocese, SweepReport};
pub use loaders::ReportingSummary;
pub use store::{retry_serialization, PgStore};
pub use visits::UrlCandidate;

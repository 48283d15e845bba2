//! Public types for the calendar API
use serde::{Deserialize, Serialize};

pub use crate::sync::job::{SourceError, SyncRunSummary};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncQuery {
    /// Only sync this calendar source
    pub source_id: Option<String>,
}

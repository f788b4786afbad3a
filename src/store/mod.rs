//! Backing stores for quota counters and analytics rows.
//!
//! One implementation is picked at startup from configuration and handed to
//! the ledger and recorder as a trait object.

mod memory;
mod postgrest;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::models::{AnalyticsEvent, FeedbackRecord, GenerationOutcome};

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Generations used by `user_id` on `day`; 0 when no row exists.
    async fn used(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError>;

    /// Adds one to the `(user_id, day)` counter, creating it if needed.
    /// Returns the new count.
    async fn increment(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError>;
    async fn insert_generation(&self, outcome: &GenerationOutcome) -> Result<(), StoreError>;
    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), StoreError>;
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsEvent>, StoreError>;
    async fn generations_since(&self, since: DateTime<Utc>) -> Result<Vec<GenerationOutcome>, StoreError>;
}

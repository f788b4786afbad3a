use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

use super::{AnalyticsStore, QuotaStore};
use crate::error::StoreError;
use crate::models::{AnalyticsEvent, FeedbackRecord, GenerationOutcome, QuotaKey};

/// In-process store for development and offline mode. Rows live until the
/// process exits; nothing is evicted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    quota: RwLock<HashMap<QuotaKey, u32>>,
    events: RwLock<Vec<AnalyticsEvent>>,
    generations: RwLock<Vec<GenerationOutcome>>,
    feedback: RwLock<Vec<FeedbackRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().clone()
    }

    pub fn generations(&self) -> Vec<GenerationOutcome> {
        self.generations.read().clone()
    }

    pub fn feedback(&self) -> Vec<FeedbackRecord> {
        self.feedback.read().clone()
    }
}

fn key(user_id: &str, day: NaiveDate) -> QuotaKey {
    QuotaKey { user_id: user_id.to_string(), day }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn used(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError> {
        Ok(self.quota.read().get(&key(user_id, day)).copied().unwrap_or(0))
    }

    async fn increment(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError> {
        let mut guard = self.quota.write();
        let count = guard.entry(key(user_id, day)).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        tracing::info!("[Analytics] {} {}", event.event_type, event.metadata);
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn insert_generation(&self, outcome: &GenerationOutcome) -> Result<(), StoreError> {
        tracing::info!(
            "[Generation Log] {} {}ms size={} room={} error={:?}",
            if outcome.success { "✓" } else { "✗" },
            outcome.duration_ms,
            outcome.room_size,
            outcome.room_type,
            outcome.error_message
        );
        self.generations.write().push(outcome.clone());
        Ok(())
    }

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), StoreError> {
        tracing::info!("[Feedback] user={} rating={}", feedback.user_id, feedback.rating);
        self.feedback.write().push(feedback.clone());
        Ok(())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsEvent>, StoreError> {
        Ok(self.events.read().iter().filter(|e| e.created_at >= since).cloned().collect())
    }

    async fn generations_since(&self, since: DateTime<Utc>) -> Result<Vec<GenerationOutcome>, StoreError> {
        Ok(self.generations.read().iter().filter(|g| g.created_at >= since).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use chrono::Duration;

    #[tokio::test]
    async fn quota_counters_are_per_user_and_day() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        assert_eq!(store.increment("u1", today).await.unwrap(), 1);
        assert_eq!(store.increment("u1", today).await.unwrap(), 2);
        assert_eq!(store.used("u1", today).await.unwrap(), 2);
        assert_eq!(store.used("u1", tomorrow).await.unwrap(), 0);
        assert_eq!(store.used("u2", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn window_queries_filter_by_timestamp() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for age_days in [0, 3, 10] {
            let event = AnalyticsEvent {
                event_type: EventType::Upload,
                metadata: serde_json::json!({}),
                user_id: "anonymous".into(),
                created_at: now - Duration::days(age_days),
            };
            store.insert_event(&event).await.unwrap();
        }
        let recent = store.events_since(now - Duration::days(7)).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}

//! Analytics recording and dashboard aggregation.
//!
//! Recording never fails from the caller's point of view: rows the store
//! rejects go to a bounded in-memory fallback buffer (oldest dropped first)
//! and are still counted by the dashboard.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use serde_with::skip_serializing_none;
use tracing::{error, warn};

use crate::models::{AnalyticsEvent, EventType, FeedbackRecord, GenerationOutcome};
use crate::store::AnalyticsStore;

pub const ANONYMOUS: &str = "anonymous";
pub const DEFAULT_STATS_WINDOW_DAYS: u32 = 7;

#[derive(Debug)]
struct FallbackBuffer {
    capacity: usize,
    events: VecDeque<AnalyticsEvent>,
    generations: VecDeque<GenerationOutcome>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, capacity: usize, item: T) {
    if capacity == 0 {
        return;
    }
    if queue.len() >= capacity {
        queue.pop_front();
        warn!(capacity, "Analytics fallback buffer full, dropping oldest record");
    }
    queue.push_back(item);
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DailyCost {
    pub date: String,
    pub cost: f64,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_generations: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_generation_time: u64,
    pub total_cost: f64,
    pub daily_costs: Vec<DailyCost>,
    pub event_counts: BTreeMap<String, u64>,
    pub error: Option<String>,
}

pub struct AnalyticsRecorder {
    store: Arc<dyn AnalyticsStore>,
    fallback: Mutex<FallbackBuffer>,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<dyn AnalyticsStore>, fallback_capacity: usize) -> Self {
        Self {
            store,
            fallback: Mutex::new(FallbackBuffer {
                capacity: fallback_capacity,
                events: VecDeque::new(),
                generations: VecDeque::new(),
            }),
        }
    }

    /// Appends one event. `user_id` defaults to `anonymous`.
    pub async fn record_event(&self, event_type: EventType, user_id: Option<&str>, metadata: Value) {
        let event = AnalyticsEvent {
            event_type,
            metadata,
            user_id: user_id.filter(|u| !u.is_empty()).unwrap_or(ANONYMOUS).to_string(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_event(&event).await {
            error!(event_type = %event_type, error = %e, "Failed to track event, buffering in memory");
            let mut buffer = self.fallback.lock();
            let capacity = buffer.capacity;
            push_bounded(&mut buffer.events, capacity, event);
        }
    }

    pub async fn record_generation_outcome(&self, outcome: GenerationOutcome) {
        if let Err(e) = self.store.insert_generation(&outcome).await {
            error!(error = %e, "Failed to log generation, buffering in memory");
            let mut buffer = self.fallback.lock();
            let capacity = buffer.capacity;
            push_bounded(&mut buffer.generations, capacity, outcome);
        }
    }

    pub async fn save_feedback(
        &self,
        user_id: Option<&str>,
        generation_id: Option<String>,
        rating: u8,
        comment: String,
    ) -> FeedbackOutcome {
        let user_id = user_id.filter(|u| !u.is_empty()).unwrap_or(ANONYMOUS);
        let record = FeedbackRecord {
            user_id: user_id.to_string(),
            generation_id,
            rating,
            comment,
            created_at: Utc::now(),
        };

        match self.store.insert_feedback(&record).await {
            Ok(()) => {
                self.record_event(EventType::Feedback, Some(user_id), json!({ "userId": user_id, "rating": rating }))
                    .await;
                FeedbackOutcome { success: true, error: None }
            }
            Err(e) => {
                error!(error = %e, "Failed to save feedback");
                FeedbackOutcome { success: false, error: Some(e.to_string()) }
            }
        }
    }

    /// Number of (events, generations) waiting in the fallback buffer.
    pub fn fallback_len(&self) -> (usize, usize) {
        let buffer = self.fallback.lock();
        (buffer.events.len(), buffer.generations.len())
    }

    pub async fn dashboard_stats(&self, window_days: u32) -> DashboardStats {
        let since = Utc::now()
            .checked_sub_signed(Duration::days(i64::from(window_days)))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let mut failure = None;

        let mut generations = self.store.generations_since(since).await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to read generation logs");
            failure = Some(e.to_string());
            Vec::new()
        });
        let mut events = self.store.events_since(since).await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to read analytics events");
            failure.get_or_insert_with(|| e.to_string());
            Vec::new()
        });

        {
            let buffer = self.fallback.lock();
            generations.extend(buffer.generations.iter().filter(|g| g.created_at >= since).cloned());
            events.extend(buffer.events.iter().filter(|e| e.created_at >= since).cloned());
        }

        let mut stats = aggregate(&generations, &events);
        stats.error = failure;
        stats
    }
}

/// `part / total * 100`, one decimal; 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(part as f64 / total as f64 * 100.0, 1)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn aggregate(generations: &[GenerationOutcome], events: &[AnalyticsEvent]) -> DashboardStats {
    let total = generations.len();
    let successes = generations.iter().filter(|g| g.success).count();
    let total_duration: u64 = generations.iter().map(|g| g.duration_ms).sum();
    let total_cost: f64 = generations.iter().map(|g| g.api_cost).sum();

    let mut per_day: BTreeMap<String, f64> = BTreeMap::new();
    for g in generations {
        *per_day.entry(g.created_at.date_naive().to_string()).or_default() += g.api_cost;
    }

    let mut event_counts: BTreeMap<String, u64> = BTreeMap::new();
    for e in events {
        *event_counts.entry(e.event_type.to_string()).or_default() += 1;
    }

    DashboardStats {
        total_generations: total,
        success_rate: percentage(successes, total),
        error_rate: percentage(total - successes, total),
        avg_generation_time: if total > 0 {
            (total_duration as f64 / total as f64).round() as u64
        } else {
            0
        },
        total_cost: round_to(total_cost, 4),
        daily_costs: per_day
            .into_iter()
            .map(|(date, cost)| DailyCost { date, cost: round_to(cost, 4) })
            .collect(),
        event_counts,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{RoomSize, RoomType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct DownStore;

    #[async_trait]
    impl AnalyticsStore for DownStore {
        async fn insert_event(&self, _: &AnalyticsEvent) -> Result<(), StoreError> {
            Err(StoreError::Http("down".into()))
        }
        async fn insert_generation(&self, _: &GenerationOutcome) -> Result<(), StoreError> {
            Err(StoreError::Http("down".into()))
        }
        async fn insert_feedback(&self, _: &FeedbackRecord) -> Result<(), StoreError> {
            Err(StoreError::Http("down".into()))
        }
        async fn events_since(&self, _: DateTime<Utc>) -> Result<Vec<AnalyticsEvent>, StoreError> {
            Err(StoreError::Http("down".into()))
        }
        async fn generations_since(&self, _: DateTime<Utc>) -> Result<Vec<GenerationOutcome>, StoreError> {
            Err(StoreError::Http("down".into()))
        }
    }

    fn outcome(success: bool, duration_ms: u64, api_cost: f64) -> GenerationOutcome {
        GenerationOutcome {
            generation_id: None,
            user_id: "u".into(),
            room_size: RoomSize::M,
            room_type: RoomType::Kitchen,
            duration_ms,
            success,
            error_message: (!success).then(|| "boom".to_string()),
            api_cost,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_window_has_zero_rates() {
        let stats = aggregate(&[], &[]);
        assert_eq!(stats.total_generations, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.avg_generation_time, 0);
        assert!(stats.daily_costs.is_empty());
    }

    #[test]
    fn rates_and_costs_are_rounded() {
        let gens = [outcome(true, 1000, 0.0255), outcome(true, 2000, 0.03), outcome(false, 500, 0.0005)];
        let stats = aggregate(&gens, &[]);
        assert_eq!(stats.total_generations, 3);
        assert_eq!(stats.success_rate, 66.7);
        assert_eq!(stats.error_rate, 33.3);
        assert_eq!(stats.avg_generation_time, 1167);
        assert_eq!(stats.total_cost, 0.056);
        assert_eq!(stats.daily_costs.len(), 1);
        assert_eq!(stats.daily_costs[0].cost, 0.056);
    }

    #[tokio::test]
    async fn recording_never_fails_when_store_is_down() {
        let recorder = AnalyticsRecorder::new(Arc::new(DownStore), 2);
        recorder.record_event(EventType::Upload, None, json!({})).await;
        recorder.record_generation_outcome(outcome(true, 10, 0.01)).await;
        assert_eq!(recorder.fallback_len(), (1, 1));

        for _ in 0..5 {
            recorder.record_event(EventType::Share, Some("u"), json!({ "platform": "line" })).await;
        }
        assert_eq!(recorder.fallback_len(), (2, 1));
    }

    #[tokio::test]
    async fn stats_fall_back_to_buffer_and_report_error() {
        let recorder = AnalyticsRecorder::new(Arc::new(DownStore), 10);
        recorder.record_generation_outcome(outcome(true, 100, 0.02)).await;
        recorder.record_event(EventType::GenerateSuccess, Some("u"), json!({})).await;

        let stats = recorder.dashboard_stats(7).await;
        assert_eq!(stats.total_generations, 1);
        assert_eq!(stats.event_counts.get("generate_success"), Some(&1));
        assert!(stats.error.is_some());
    }

    #[tokio::test]
    async fn window_beyond_calendar_range_covers_everything() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::new(store.clone(), 10);
        recorder.record_generation_outcome(outcome(true, 100, 0.02)).await;

        for days in [100_000_000, u32::MAX] {
            let stats = recorder.dashboard_stats(days).await;
            assert_eq!(stats.total_generations, 1);
            assert_eq!(stats.error, None);
        }
    }

    #[tokio::test]
    async fn events_default_to_anonymous_user() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::new(store.clone(), 10);
        recorder.record_event(EventType::Upload, None, json!({})).await;
        recorder.record_event(EventType::Upload, Some(""), json!({})).await;
        assert!(store.events().iter().all(|e| e.user_id == ANONYMOUS));
    }

    #[tokio::test]
    async fn feedback_is_stored_and_tracked() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::new(store.clone(), 10);
        let result = recorder.save_feedback(Some("u"), Some("gen-1".into()), 5, "great".into()).await;
        assert_eq!(result, FeedbackOutcome { success: true, error: None });
        assert_eq!(store.feedback().len(), 1);
        assert_eq!(store.events()[0].event_type, EventType::Feedback);

        let down = AnalyticsRecorder::new(Arc::new(DownStore), 10);
        let failed = down.save_feedback(None, None, 3, String::new()).await;
        assert!(!failed.success && failed.error.is_some());
    }
}

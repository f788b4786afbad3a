use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AnalyticsStore, QuotaStore};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{AnalyticsEvent, FeedbackRecord, GenerationOutcome, RoomSize, RoomType};

const QUOTA_TABLE: &str = "user_quota";
const EVENTS_TABLE: &str = "analytics_events";
const GENERATIONS_TABLE: &str = "generation_logs";
const FEEDBACK_TABLE: &str = "user_feedback";

/// Row store reached through a PostgREST-compatible REST API.
///
/// Increments are read-then-write, so two concurrent increments for one
/// `(user, day)` can collapse into one.
pub struct PostgrestStore {
    client: Client,
    rest_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct QuotaRow {
    id: i64,
    generations_used: u32,
}

/// `generation_logs` row. The generation id is not a column; it travels in
/// the `generate_*` event metadata instead.
#[derive(Debug, Serialize)]
struct GenerationRow<'a> {
    user_id: &'a str,
    room_size: RoomSize,
    room_type: RoomType,
    duration_ms: u64,
    success: bool,
    error_message: Option<&'a str>,
    api_cost: f64,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a GenerationOutcome> for GenerationRow<'a> {
    fn from(outcome: &'a GenerationOutcome) -> Self {
        Self {
            user_id: &outcome.user_id,
            room_size: outcome.room_size,
            room_type: outcome.room_type,
            duration_ms: outcome.duration_ms,
            success: outcome.success,
            error_message: outcome.error_message.as_deref(),
            api_cost: outcome.api_cost,
            created_at: outcome.created_at,
        }
    }
}

impl PostgrestStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            client: Client::new(),
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            service_key: config.service_key.clone(),
        }
    }

    fn table(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(|e| StoreError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status: status.as_u16(), body })
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<(), StoreError> {
        let request = self
            .table(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(row);
        Self::send(request).await.map(|_| ())
    }

    async fn select_since<T: DeserializeOwned>(
        &self,
        table: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<T>, StoreError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let request = self
            .table(reqwest::Method::GET, table)
            .query(&[("select", "*".to_string()), ("created_at", format!("gte.{since}"))]);
        Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn quota_row(&self, user_id: &str, day: NaiveDate) -> Result<Option<QuotaRow>, StoreError> {
        let request = self.table(reqwest::Method::GET, QUOTA_TABLE).query(&[
            ("select", "id,generations_used".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("date", format!("eq.{day}")),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<QuotaRow> = Self::send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl QuotaStore for PostgrestStore {
    async fn used(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError> {
        Ok(self.quota_row(user_id, day).await?.map(|r| r.generations_used).unwrap_or(0))
    }

    async fn increment(&self, user_id: &str, day: NaiveDate) -> Result<u32, StoreError> {
        match self.quota_row(user_id, day).await? {
            Some(row) => {
                let next = row.generations_used + 1;
                let request = self
                    .table(reqwest::Method::PATCH, QUOTA_TABLE)
                    .query(&[("id", format!("eq.{}", row.id))])
                    .header("Prefer", "return=minimal")
                    .json(&json!({ "generations_used": next }));
                Self::send(request).await?;
                Ok(next)
            }
            None => {
                let row = json!({ "user_id": user_id, "date": day.to_string(), "generations_used": 1 });
                self.insert(QUOTA_TABLE, &row).await?;
                Ok(1)
            }
        }
    }
}

#[async_trait]
impl AnalyticsStore for PostgrestStore {
    async fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        self.insert(EVENTS_TABLE, event).await
    }

    async fn insert_generation(&self, outcome: &GenerationOutcome) -> Result<(), StoreError> {
        self.insert(GENERATIONS_TABLE, &GenerationRow::from(outcome)).await
    }

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), StoreError> {
        self.insert(FEEDBACK_TABLE, feedback).await
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsEvent>, StoreError> {
        self.select_since(EVENTS_TABLE, since).await
    }

    async fn generations_since(&self, since: DateTime<Utc>) -> Result<Vec<GenerationOutcome>, StoreError> {
        self.select_since(GENERATIONS_TABLE, since).await
    }
}

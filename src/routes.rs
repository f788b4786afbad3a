use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::analytics::{AnalyticsRecorder, DashboardStats, FeedbackOutcome, ANONYMOUS, DEFAULT_STATS_WINDOW_DAYS};
use crate::classifier::{RoomClassifier, VisionClassifier};
use crate::config::AppConfig;
use crate::cost::CostEstimator;
use crate::error::{AppError, AppResult};
use crate::models::{EventType, GenerationRequest, ImageDimensions, RenovationCosts, RoomSize, RoomType};
use crate::orchestrator::Orchestrator;
use crate::quota::QuotaLedger;
use crate::store::{AnalyticsStore, MemoryStore, PostgrestStore, QuotaStore};
use crate::transformer::{FluxTransformer, ImageTransformer};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub quota: QuotaLedger,
    pub analytics: Arc<AnalyticsRecorder>,
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    /// Wires every component from configuration. The backing store is picked
    /// here, once.
    pub fn from_config(config: &AppConfig) -> Self {
        match &config.store {
            Some(store_config) => {
                tracing::info!("Using REST row store at {}", store_config.url);
                let store = Arc::new(PostgrestStore::new(store_config));
                Self::with_stores(config, store.clone(), store)
            }
            None => {
                tracing::warn!("No store configured, using in-memory store");
                let store = Arc::new(MemoryStore::new());
                Self::with_stores(config, store.clone(), store)
            }
        }
    }

    pub fn with_stores(
        config: &AppConfig,
        quota_store: Arc<dyn QuotaStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
    ) -> Self {
        let estimator = CostEstimator::new(config.rates);
        let classifier = Arc::new(VisionClassifier::new(&config.vision, estimator));
        let transformer = Arc::new(FluxTransformer::new(&config.image, estimator));
        Self::with_parts(config, quota_store, analytics_store, classifier, transformer)
    }

    pub fn with_parts(
        config: &AppConfig,
        quota_store: Arc<dyn QuotaStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        classifier: Arc<dyn RoomClassifier>,
        transformer: Arc<dyn ImageTransformer>,
    ) -> Self {
        let analytics = Arc::new(AnalyticsRecorder::new(analytics_store, config.analytics_fallback_capacity));
        let orchestrator = Orchestrator::new(
            classifier,
            transformer,
            analytics.clone(),
            CostEstimator::new(config.rates),
            config.generation_timeout,
            config.image.fallback_url.clone(),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            quota: QuotaLedger::new(quota_store),
            analytics,
            admin_key: config.admin_key.as_deref().map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/quota/:user_id", get(get_quota))
        .route("/api/track/upload", post(track_upload))
        .route("/api/track/share", post(track_share))
        .route("/api/feedback", post(submit_feedback))
        .route("/api/admin/stats", get(admin_stats))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

// --- POST /api/generate ---

#[derive(Debug, Default)]
struct GenerateForm {
    image: Option<Bytes>,
    room_size: Option<String>,
    user_id: Option<String>,
    image_width: Option<String>,
    image_height: Option<String>,
    preset: Option<String>,
}

impl GenerateForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid image upload: {e}")))?;
                form.image = Some(bytes).filter(|b| !b.is_empty());
                continue;
            }
            let text = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Invalid form field {name}: {e}")))?;
            let slot = match name.as_str() {
                "roomSize" => &mut form.room_size,
                "userId" => &mut form.user_id,
                "imageWidth" => &mut form.image_width,
                "imageHeight" => &mut form.image_height,
                "preset" => &mut form.preset,
                _ => continue,
            };
            *slot = Some(text.trim().to_string()).filter(|t| !t.is_empty());
        }
        Ok(form)
    }

    fn dimensions(&self, image: &[u8]) -> Option<ImageDimensions> {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.parse::<u32>().ok());
        match (parse(&self.image_width), parse(&self.image_height)) {
            (Some(w), Some(h)) => ImageDimensions::new(w, h),
            _ => None,
        }
        .or_else(|| ImageDimensions::from_image_header(image))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateData {
    pub generation_id: Uuid,
    pub generated_image_url: String,
    pub room_type: RoomType,
    pub room_size: RoomSize,
    pub preset: String,
    pub costs: RenovationCosts,
    pub remaining: u32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub data: GenerateData,
}

pub async fn generate(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<GenerateResponse>> {
    // A non-multipart body cannot carry the image.
    let form = match multipart {
        Ok(multipart) => GenerateForm::read(multipart).await?,
        Err(_) => GenerateForm::default(),
    };

    let image = form.image.clone().ok_or_else(|| AppError::Validation("Image file is required".into()))?;
    let room_size: RoomSize = form
        .room_size
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::Validation("Valid room size (S, M, L) is required".into()))?;
    let user_id = form.user_id.clone().unwrap_or_else(|| ANONYMOUS.to_string());

    let quota = state.quota.check(&user_id).await;
    if !quota.allowed {
        tracing::info!("⛔ Quota exhausted for user {}", user_id);
        return Err(AppError::QuotaExceeded);
    }

    let dimensions = form.dimensions(&image);
    let result = state
        .orchestrator
        .generate(GenerationRequest {
            image,
            room_size,
            user_id: user_id.clone(),
            dimensions,
            preset: form.preset,
        })
        .await?;

    state.quota.decrement(&user_id).await;

    Ok(Json(GenerateResponse {
        success: true,
        data: GenerateData {
            generation_id: result.generation_id,
            generated_image_url: result.url,
            room_type: result.room_type,
            room_size,
            preset: result.preset,
            costs: result.costs,
            remaining: quota.remaining.saturating_sub(1),
            timed_out: result.timed_out,
            duration_ms: result.duration_ms,
        },
    }))
}

// --- GET /api/quota/:user_id ---

pub async fn get_quota(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Value> {
    let quota = state.quota.check(&user_id).await;
    Json(json!({ "remaining": quota.remaining }))
}

// --- POST /api/track/* ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackBody {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

pub async fn track_upload(
    State(state): State<AppState>,
    body: Result<Json<TrackBody>, JsonRejection>,
) -> Json<Value> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let user_id = body.user_id.as_deref().unwrap_or(ANONYMOUS);
    state
        .analytics
        .record_event(EventType::Upload, Some(user_id), json!({ "userId": user_id }))
        .await;
    Json(json!({ "success": true }))
}

pub async fn track_share(
    State(state): State<AppState>,
    body: Result<Json<TrackBody>, JsonRejection>,
) -> Json<Value> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let user_id = body.user_id.as_deref().unwrap_or(ANONYMOUS);
    let platform = body.platform.as_deref().unwrap_or("unknown");
    state
        .analytics
        .record_event(EventType::Share, Some(user_id), json!({ "userId": user_id, "platform": platform }))
        .await;
    Json(json!({ "success": true }))
}

// --- POST /api/feedback ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub generation_id: Option<String>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    body: Result<Json<FeedbackBody>, JsonRejection>,
) -> AppResult<Json<FeedbackOutcome>> {
    let Json(body) = body.map_err(|e| AppError::Validation(format!("Invalid feedback body: {e}")))?;
    let rating = body
        .rating
        .filter(|r| (1..=5).contains(r))
        .ok_or_else(|| AppError::Validation("Rating must be between 1 and 5".into()))? as u8;

    let outcome = state
        .analytics
        .save_feedback(body.user_id.as_deref(), body.generation_id, rating, body.comment.unwrap_or_default())
        .await;
    Ok(Json(outcome))
}

// --- GET /api/admin/stats ---

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
    pub key: Option<String>,
}

pub async fn admin_stats(
    State(state): State<AppState>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> AppResult<Json<DashboardStats>> {
    let Query(query) = query.map_err(|e| AppError::Validation(format!("Invalid stats query: {e}")))?;
    if let Some(expected) = state.admin_key.as_deref() {
        if query.key.as_deref() != Some(expected) {
            return Err(AppError::Unauthorized);
        }
    }
    let days = query.days.unwrap_or(DEFAULT_STATS_WINDOW_DAYS);
    Ok(Json(state.analytics.dashboard_stats(days).await))
}

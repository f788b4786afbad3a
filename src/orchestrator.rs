//! End-to-end staging pipeline: classify, build prompt, transform under a
//! deadline, account cost, record analytics.
//!
//! Every invocation emits one `generate_start`, then exactly one of
//! `generate_success` / `generate_fail`, and writes one outcome record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsRecorder;
use crate::classifier::RoomClassifier;
use crate::cost::{round6, CostEstimator};
use crate::deadline::{degrade, with_timeout};
use crate::error::GenerationError;
use crate::models::{
    EventType, GenerationOutcome, GenerationRequest, RoomAnalysis, RoomType, StagingResult,
    TransformResult,
};
use crate::prompts::build_prompt;
use crate::transformer::{ImageTransformer, TransformJob};

pub struct Orchestrator {
    classifier: Arc<dyn RoomClassifier>,
    transformer: Arc<dyn ImageTransformer>,
    analytics: Arc<AnalyticsRecorder>,
    estimator: CostEstimator,
    deadline: Duration,
    fallback_url: String,
}

/// What the pipeline got through before it stopped.
struct Progress {
    room_type: RoomType,
    cost: f64,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn RoomClassifier>,
        transformer: Arc<dyn ImageTransformer>,
        analytics: Arc<AnalyticsRecorder>,
        estimator: CostEstimator,
        deadline: Duration,
        fallback_url: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            transformer,
            analytics,
            estimator,
            deadline,
            fallback_url: fallback_url.into(),
        }
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<StagingResult, GenerationError> {
        let generation_id = Uuid::new_v4();
        let started = Instant::now();
        let user_id = request.user_id.clone();
        let room_size = request.room_size;

        info!(%generation_id, user_id = %user_id, %room_size, "🚀 Generation started");
        self.analytics
            .record_event(
                EventType::GenerateStart,
                Some(&user_id),
                json!({ "userId": user_id, "roomSize": room_size, "generationId": generation_id }),
            )
            .await;

        let mut progress = Progress { room_type: RoomType::default(), cost: 0.0 };
        let outcome = self.run(generation_id, request, &mut progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let api_cost = round6(progress.cost);

        let error_message = outcome.as_ref().err().map(|e| e.to_string());
        match &outcome {
            Ok(_) => {
                info!(%generation_id, duration_ms, api_cost, "✅ Generation succeeded");
                self.analytics
                    .record_event(
                        EventType::GenerateSuccess,
                        Some(&user_id),
                        json!({
                            "userId": user_id,
                            "roomSize": room_size,
                            "generationId": generation_id,
                            "durationMs": duration_ms,
                            "apiCost": api_cost,
                        }),
                    )
                    .await;
            }
            Err(message) => {
                error!(%generation_id, duration_ms, api_cost, error = %message, "❌ Generation failed");
                self.analytics
                    .record_event(
                        EventType::GenerateFail,
                        Some(&user_id),
                        json!({
                            "userId": user_id,
                            "roomSize": room_size,
                            "generationId": generation_id,
                            "error": message,
                            "apiCost": api_cost,
                        }),
                    )
                    .await;
            }
        }

        self.analytics
            .record_generation_outcome(GenerationOutcome {
                generation_id: Some(generation_id),
                user_id,
                room_size,
                room_type: progress.room_type,
                duration_ms,
                success: outcome.is_ok(),
                error_message,
                api_cost,
                created_at: Utc::now(),
            })
            .await;

        match outcome {
            Ok((analysis, transformed, preset)) => Ok(StagingResult {
                generation_id,
                url: transformed.url,
                room_type: analysis.room_type,
                features: analysis.features,
                preset,
                costs: room_size.renovation_costs(),
                duration_ms,
                timed_out: transformed.timed_out,
                api_cost,
            }),
            Err(message) => Err(GenerationError { message, partial_cost: api_cost }),
        }
    }

    /// Classifying and Transforming states. Costs land in `progress` as they
    /// are incurred so the failure path can report them.
    async fn run(
        &self,
        generation_id: Uuid,
        request: GenerationRequest,
        progress: &mut Progress,
    ) -> Result<(RoomAnalysis, TransformResult, String), String> {
        // Spawned so a panic inside the classifier lands on the failure path.
        let classify = {
            let classifier = Arc::clone(&self.classifier);
            let image = request.image.clone();
            tokio::spawn(async move { classifier.classify(&image).await })
        };
        let classified = classify
            .await
            .map_err(|e| format!("room classification aborted: {e}"))?;
        let analysis = degrade("room_classifier", RoomAnalysis::default(), std::future::ready(classified)).await;
        progress.room_type = analysis.room_type;
        progress.cost += analysis.cost;
        info!(%generation_id, room_type = %analysis.room_type, "Room classified");

        let prompt = build_prompt(request.preset.as_deref(), analysis.room_type, request.room_size);
        let preset = prompt.preset.id().to_string();
        let job = TransformJob {
            image: request.image,
            room_size: request.room_size,
            analysis: analysis.clone(),
            dimensions: request.dimensions,
            prompt,
        };

        let transformer = Arc::clone(&self.transformer);
        let timeout_result = TransformResult {
            url: self.fallback_url.clone(),
            cost: self.estimator.estimate_image_cost(request.dimensions),
            timed_out: true,
        };
        let guarded = with_timeout(
            async move { transformer.transform(job).await },
            self.deadline,
            move || Ok(timeout_result),
        )
        .await
        .map_err(|e| format!("transform task aborted: {e}"))?;

        if guarded.timed_out() {
            warn!(%generation_id, deadline_ms = self.deadline.as_millis() as u64, "⏱️ Transform timed out, using fallback");
            self.analytics
                .record_event(
                    EventType::GenerateTimeout,
                    Some(&request.user_id),
                    json!({
                        "userId": request.user_id,
                        "roomSize": request.room_size,
                        "deadlineMs": self.deadline.as_millis() as u64,
                    }),
                )
                .await;
        }

        let transformed = guarded
            .into_inner()
            .map_err(|e| format!("image transform failed: {e}"))?;
        progress.cost += transformed.cost;

        Ok((analysis, transformed, preset))
    }
}

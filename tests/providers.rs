//! Outbound clients exercised against a local mock server.

use bytes::Bytes;
use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use room_stager::classifier::{RoomClassifier, VisionClassifier};
use room_stager::config::{ImageConfig, StoreConfig, VisionConfig};
use room_stager::cost::CostEstimator;
use room_stager::models::{
    EventType, GenerationOutcome, ImageDimensions, RoomAnalysis, RoomSize, RoomType, TransformResult,
};
use room_stager::prompts::build_prompt;
use room_stager::store::{AnalyticsStore, PostgrestStore, QuotaStore};
use room_stager::transformer::{FluxTransformer, ImageTransformer, TransformJob};

const IMAGE_PATH: &str = "/fal-ai/flux/dev/image-to-image";

fn vision(server: &MockServer) -> VisionClassifier {
    let config = VisionConfig {
        api_key: Some("vision-key".into()),
        base_url: server.uri(),
        model: "test-vision".into(),
    };
    VisionClassifier::new(&config, CostEstimator::default())
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 2000, "completion_tokens": 100 }
    })
}

#[tokio::test]
async fn classifier_parses_fenced_reply_and_prices_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer vision-key"))
        .and(body_partial_json(json!({ "model": "test-vision" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "```json\n{\"roomType\": \"Kitchen\", \"features\": [\"island\", \"window\"], \"currentStyle\": \"dated\"}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let analysis = vision(&server).classify(b"jpeg-bytes").await.unwrap();
    assert_eq!(analysis.room_type, RoomType::Kitchen);
    assert_eq!(analysis.features, vec!["island".to_string(), "window".to_string()]);
    assert_eq!(analysis.cost, 0.000625);
}

#[tokio::test]
async fn classifier_maps_unknown_room_to_living_room() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "{\"roomType\": \"garage\", \"features\": []}",
        )))
        .mount(&server)
        .await;

    let analysis = vision(&server).classify(b"jpeg-bytes").await.unwrap();
    assert_eq!(analysis.room_type, RoomType::LivingRoom);
    assert_eq!(analysis.cost, 0.000625);
}

#[tokio::test]
async fn classifier_degrades_on_unparsable_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("I think this is a kitchen.")))
        .mount(&server)
        .await;

    let analysis = vision(&server).classify(b"jpeg-bytes").await.unwrap();
    assert_eq!(analysis, RoomAnalysis::default());
}

#[tokio::test]
async fn classifier_degrades_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let analysis = vision(&server).classify(b"jpeg-bytes").await.unwrap();
    assert_eq!(analysis, RoomAnalysis::default());
}

fn flux(base_url: String) -> FluxTransformer {
    let config = ImageConfig {
        api_key: Some("image-key".into()),
        base_url,
        ..ImageConfig::default()
    };
    FluxTransformer::new(&config, CostEstimator::default())
}

fn job(dimensions: Option<ImageDimensions>) -> TransformJob {
    TransformJob {
        image: Bytes::from_static(b"jpeg-bytes"),
        room_size: RoomSize::M,
        analysis: RoomAnalysis { room_type: RoomType::Bedroom, features: vec![], cost: 0.0 },
        dimensions,
        prompt: build_prompt(Some("luxury_classic"), RoomType::Bedroom, RoomSize::M),
    }
}

#[tokio::test]
async fn transformer_prices_the_returned_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .and(header("authorization", "Key image-key"))
        .and(body_partial_json(json!({ "strength": 0.75, "num_inference_steps": 28, "guidance_scale": 7.5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "url": "https://cdn.example/out.jpg", "width": 1024, "height": 1024 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = flux(server.uri()).transform(job(ImageDimensions::new(2000, 1000))).await.unwrap();
    assert_eq!(
        result,
        TransformResult { url: "https://cdn.example/out.jpg".into(), cost: 0.026214, timed_out: false }
    );

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let mut fields: Vec<&str> = sent.as_object().unwrap().keys().map(String::as_str).collect();
    fields.sort_unstable();
    assert_eq!(fields, vec!["guidance_scale", "image_url", "num_inference_steps", "prompt", "strength"]);
    assert!(sent["image_url"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn transformer_falls_back_to_input_size_when_output_size_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "url": "https://cdn.example/out.jpg" }]
        })))
        .mount(&server)
        .await;

    let result = flux(server.uri()).transform(job(ImageDimensions::new(2000, 1000))).await.unwrap();
    assert_eq!(result.url, "https://cdn.example/out.jpg");
    assert_eq!(result.cost, 0.05);

    let unknown = flux(server.uri()).transform(job(None)).await.unwrap();
    assert_eq!(unknown.cost, 0.025);
}

#[tokio::test]
async fn provider_error_yields_placeholder_but_bills_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [{ "msg": "image too small" }]
        })))
        .mount(&server)
        .await;

    let result = flux(server.uri()).transform(job(ImageDimensions::new(2000, 1000))).await.unwrap();
    assert_eq!(result, TransformResult { url: "/demo-after.jpg".into(), cost: 0.05, timed_out: false });
}

#[tokio::test]
async fn empty_image_list_yields_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": [] })))
        .mount(&server)
        .await;

    let result = flux(server.uri()).transform(job(None)).await.unwrap();
    assert_eq!(result.url, "/demo-after.jpg");
    assert_eq!(result.cost, 0.025);
}

#[tokio::test]
async fn unreachable_provider_costs_nothing() {
    // Nothing listens on port 1.
    let result = flux("http://127.0.0.1:1".into()).transform(job(ImageDimensions::new(2000, 1000))).await.unwrap();
    assert_eq!(result, TransformResult { url: "/demo-after.jpg".into(), cost: 0.0, timed_out: false });
}

fn postgrest(server: &MockServer) -> PostgrestStore {
    PostgrestStore::new(&StoreConfig { url: server.uri(), service_key: "service-key".into() })
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

#[tokio::test]
async fn quota_reads_existing_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_quota"))
        .and(header("apikey", "service-key"))
        .and(query_param("user_id", "eq.u1"))
        .and(query_param("date", "eq.2026-03-14"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 7, "generations_used": 2 }])))
        .mount(&server)
        .await;

    assert_eq!(postgrest(&server).used("u1", day()).await.unwrap(), 2);
}

#[tokio::test]
async fn quota_increment_patches_existing_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_quota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 7, "generations_used": 2 }])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/user_quota"))
        .and(query_param("id", "eq.7"))
        .and(body_json(json!({ "generations_used": 3 })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(postgrest(&server).increment("u1", day()).await.unwrap(), 3);
}

#[tokio::test]
async fn quota_increment_creates_missing_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_quota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/user_quota"))
        .and(body_json(json!({ "user_id": "u1", "date": "2026-03-14", "generations_used": 1 })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = postgrest(&server);
    assert_eq!(store.used("u1", day()).await.unwrap(), 0);
    assert_eq!(store.increment("u1", day()).await.unwrap(), 1);
}

#[tokio::test]
async fn store_errors_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_quota"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = postgrest(&server).used("u1", day()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn generation_rows_keep_the_log_table_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/generation_logs"))
        .and(header("prefer", "return=minimal"))
        .and(body_partial_json(json!({
            "user_id": "u1",
            "room_size": "L",
            "room_type": "bedroom",
            "duration_ms": 1500,
            "success": false,
            "error_message": "boom",
            "api_cost": 0.0004,
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = GenerationOutcome {
        generation_id: Some(uuid::Uuid::new_v4()),
        user_id: "u1".into(),
        room_size: RoomSize::L,
        room_type: RoomType::Bedroom,
        duration_ms: 1500,
        success: false,
        error_message: Some("boom".into()),
        api_cost: 0.0004,
        created_at: Utc::now(),
    };
    postgrest(&server).insert_generation(&outcome).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let row: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(row.get("generation_id").is_none());
    assert!(row["created_at"].is_string());
}

#[tokio::test]
async fn events_are_inserted_and_read_back_by_window() {
    let server = MockServer::start().await;
    let since = Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap();

    Mock::given(method("POST"))
        .and(path("/rest/v1/analytics_events"))
        .and(body_partial_json(json!({
            "event_type": "share",
            "user_id": "u1",
            "metadata": { "platform": "line" },
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/analytics_events"))
        .and(query_param("created_at", "gte.2026-03-14T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "event_type": "share",
            "metadata": { "platform": "line" },
            "user_id": "u1",
            "created_at": "2026-03-14T10:00:00+00:00",
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let store = postgrest(&server);
    let event = room_stager::models::AnalyticsEvent {
        event_type: EventType::Share,
        metadata: json!({ "platform": "line" }),
        user_id: "u1".into(),
        created_at: Utc::now(),
    };
    store.insert_event(&event).await.unwrap();

    let events = store.events_since(since).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Share);
    assert_eq!(events[0].metadata["platform"], "line");
}

#[tokio::test]
async fn generation_rows_without_id_decode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/generation_logs"))
        .and(query_param("select", "*"))
        .and(query_param("created_at", "gte.2026-03-14T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 41,
            "user_id": "u1",
            "room_size": "M",
            "room_type": "kitchen",
            "duration_ms": 900,
            "success": true,
            "error_message": null,
            "api_cost": 0.0254,
            "created_at": "2026-03-14T10:00:00+00:00",
        }])))
        .mount(&server)
        .await;

    let since = Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap();
    let rows = postgrest(&server).generations_since(since).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].generation_id, None);
    assert_eq!(rows[0].room_type, RoomType::Kitchen);
    assert!(rows[0].success);
}

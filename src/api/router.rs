//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`. The layer is deliberately thin: handlers
//! validate and map DTOs, the pipeline components do the work.
//!
//! NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints::{chats, patients, reports, studies};
use crate::api::types::AppContext;

/// Body cap sized for a full study upload: up to 100 slices plus form
/// overhead.
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Build the API router over a pre-constructed context.
pub fn build_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/patients", post(patients::create).get(patients::list))
        .route(
            "/patients/:id",
            get(patients::detail).delete(patients::remove),
        )
        .route("/patients/:id/chats", get(chats::list_for_patient))
        .route("/patients/:id/reports", post(reports::create))
        .route("/patients/:id/reports/latest", get(reports::latest))
        .route("/studies", post(studies::create))
        .route("/studies/:id", get(studies::detail).delete(studies::remove))
        .route("/studies/:id/refresh", post(studies::refresh))
        .route("/chats", post(chats::create))
        .route("/chats/:id", get(chats::detail))
        .route("/chats/:id/messages", post(chats::send_message))
        .route("/chats/:id/title", post(chats::generate_title))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Settings;
    use crate::db::{self, sqlite::open_memory_database};
    use crate::models::enums::StudyProcessingState;
    use crate::models::Study;
    use crate::pipeline::captioning::CaptionPipeline;
    use crate::pipeline::conversation::ConversationOrchestrator;
    use crate::pipeline::inference::{
        FallbackChain, MockText, MockVision, ProviderError, RetryPolicy, TextInference,
        VisionInference,
    };
    use crate::pipeline::metadata::MetadataExtractor;
    use crate::pipeline::report::ReportSynthesizer;
    use crate::storage::{FsObjectStore, ObjectStore, StorageError};

    use super::*;

    fn test_settings() -> Settings {
        Settings {
            bind_addr: "127.0.0.1:0".into(),
            database_path: PathBuf::from(":memory:"),
            storage_root: PathBuf::new(),
            gemini_api_key: "test-key".into(),
            gemini_base_url: "http://localhost".into(),
            gemini_model: "test-model".into(),
            gemini_flash_model: "test-flash".into(),
            medgemma_endpoint: "http://localhost/predict".into(),
            medgemma_token: "test-token".into(),
            processing_timeout: Duration::from_secs(5),
            chat_timeout: Duration::from_secs(5),
            retry_max: 0,
            retry_delay: Duration::from_millis(1),
        }
    }

    /// Context wired with mocks and throwaway storage. The tempdir guard
    /// must stay alive for the test's duration.
    fn test_context(vision: MockVision, text: MockText) -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let retry = RetryPolicy::new(0, Duration::from_millis(1));
        let text: Arc<dyn TextInference> = Arc::new(text);
        let vision: Arc<dyn VisionInference> = Arc::new(vision);
        let chain = Arc::new(FallbackChain::new(
            Arc::clone(&vision),
            Arc::clone(&vision),
            retry,
        ));

        let ctx = AppContext {
            db: Arc::new(Mutex::new(open_memory_database().unwrap())),
            store: Arc::clone(&store),
            captioning: Arc::new(CaptionPipeline::new(
                chain,
                Arc::clone(&text),
                store,
                retry,
            )),
            metadata: Arc::new(MetadataExtractor::new(Arc::clone(&text), retry)),
            reports: Arc::new(ReportSynthesizer::new(Arc::clone(&text), retry)),
            conversation: Arc::new(ConversationOrchestrator::new(text, retry)),
            settings: Arc::new(test_settings()),
        };
        (dir, ctx)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(ctx: &AppContext, req: Request<Body>) -> axum::response::Response {
        build_router(ctx.clone()).oneshot(req).await.unwrap()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 10 * 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn response_text(response: axum::response::Response) -> String {
        let body = to_bytes(response.into_body(), 10 * 1024 * 1024).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn seed_patient(ctx: &AppContext) -> String {
        let response = send(
            ctx,
            json_request(
                "POST",
                "/api/patients",
                serde_json::json!({
                    "name": "Jane Doe",
                    "age": 54,
                    "sex": "F",
                    "reason_for_imaging": "Annual lung screening"
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await["id"].as_str().unwrap().to_string()
    }

    /// Insert a summarized study directly, bypassing the upload pipeline.
    fn seed_study(ctx: &AppContext, patient_id: &str, title: &str, summary: &str) -> Study {
        let study = Study {
            id: Uuid::new_v4(),
            patient_id: Uuid::parse_str(patient_id).unwrap(),
            title: title.into(),
            modality: Some("CT".into()),
            imaging_datetime: Utc::now(),
            series_summary: summary.into(),
            include_codes: false,
            processing_state: StudyProcessingState::Summarized,
            created_at: Utc::now(),
        };
        ctx.with_conn(|conn| db::insert_study(conn, &study)).unwrap();
        study
    }

    fn png_fixture(seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_fn(16, 16, |x, y| {
            image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    const BOUNDARY: &str = "chronoscan-test-boundary";

    fn multipart_request(fields: &[(&str, &str)], files: &[(Vec<u8>, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                     name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (index, (bytes, content_type)) in files.iter().enumerate() {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                     name=\"file{index}\"; filename=\"slice{index}\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/studies")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    // ── patients ──

    #[tokio::test]
    async fn patient_crud_round_trip() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );

        let id = seed_patient(&ctx).await;

        let response = send(&ctx, get_request("/api/patients")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let listed = response_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["name"], "Jane Doe");

        let response = send(&ctx, get_request(&format!("/api/patients/{id}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let detail = response_json(response).await;
        assert_eq!(detail["age"], 54);
        assert_eq!(detail["studies"].as_array().unwrap().len(), 0);

        let response = send(
            &ctx,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/patients/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&ctx, get_request(&format!("/api/patients/{id}"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_id_is_structured_400() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );

        let response = send(&ctx, get_request("/api/patients/not-a-uuid")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert!(json["error"]["message"].as_str().unwrap().contains("patient"));
    }

    #[tokio::test]
    async fn unknown_patient_is_404() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );

        let response = send(
            &ctx,
            get_request(&format!("/api/patients/{}", Uuid::new_v4())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn patient_age_is_validated() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );

        let response = send(
            &ctx,
            json_request(
                "POST",
                "/api/patients",
                serde_json::json!({"name": "X", "age": 200, "sex": "M"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ── studies ──

    #[tokio::test]
    async fn study_upload_runs_the_full_pipeline() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "Clear lung fields"),
            MockText::new("Unremarkable chest study."),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(
                &[
                    ("patient_id", patient_id.as_str()),
                    ("title", "Chest CT"),
                    ("modality", "CT"),
                    ("imaging_datetime", "2024-03-01"),
                ],
                &[
                    (png_fixture(1), "image/png"),
                    (png_fixture(2), "image/png"),
                ],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let detail = response_json(response).await;
        assert_eq!(detail["title"], "Chest CT");
        assert_eq!(detail["modality"], "CT");
        assert_eq!(detail["processing_state"], "Summarized");
        assert_eq!(detail["series_summary"], "Unremarkable chest study.");
        assert!(detail["imaging_datetime"]
            .as_str()
            .unwrap()
            .starts_with("2024-03-01T00:00:00"));

        let images = detail["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0]["slice_index"], 0);
        assert_eq!(images[1]["slice_index"], 1);
        assert_eq!(images[0]["raw_caption"], "Clear lung fields");
        assert_eq!(images[0]["enhanced_caption"], "Unremarkable chest study.");
    }

    #[tokio::test]
    async fn upload_without_images_is_400() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(&[("patient_id", patient_id.as_str())], &[]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_upload_format_is_400() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(
                &[("patient_id", patient_id.as_str())],
                &[(b"PK\x03\x04".to_vec(), "application/zip")],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Unsupported image format"));
    }

    #[tokio::test]
    async fn failed_auto_date_demands_manual_entry() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("I could not find a date."),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(
                &[("patient_id", patient_id.as_str()), ("auto_date", "true")],
                &[(png_fixture(1), "image/png")],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "MANUAL_DATE_REQUIRED");

        // No study was created.
        let response = send(&ctx, get_request(&format!("/api/patients/{patient_id}"))).await;
        let detail = response_json(response).await;
        assert_eq!(detail["studies"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn refresh_recaptions_a_study() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "Initial caption"),
            MockText::new("Initial summary."),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(
                &[("patient_id", patient_id.as_str()), ("title", "Chest CT")],
                &[(png_fixture(9), "image/png")],
            ),
        )
        .await;
        let study_id = response_json(response).await["id"].as_str().unwrap().to_string();

        let response = send(
            &ctx,
            Request::builder()
                .method("POST")
                .uri(format!("/api/studies/{study_id}/refresh"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let detail = response_json(response).await;
        assert_eq!(detail["processing_state"], "Summarized");
        assert_eq!(detail["images"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_study_purges_its_blobs() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("summary"),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            multipart_request(
                &[("patient_id", patient_id.as_str()), ("title", "Chest CT")],
                &[(png_fixture(4), "image/png")],
            ),
        )
        .await;
        let detail = response_json(response).await;
        let study_id = detail["id"].as_str().unwrap().to_string();
        let blob_ref = detail["images"][0]["blob_ref"].as_str().unwrap().to_string();
        assert!(ctx.store.get(&blob_ref).is_ok());

        let response = send(
            &ctx,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/studies/{study_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(matches!(
            ctx.store.get(&blob_ref),
            Err(StorageError::NotFound(_))
        ));
        let response = send(&ctx, get_request(&format!("/api/studies/{study_id}"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ── reports ──

    #[tokio::test]
    async fn report_synthesis_persists_and_renders_citations() {
        let report_json = r#"{
            "findings": "A 4mm nodule is present [CITE:study-a]. It is stable over time [CITE:study-a,study-b].",
            "impression": "No acute disease [CITE:study-b].",
            "next_steps": "Annual low-dose CT follow-up."
        }"#;
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new(report_json),
        );
        let patient_id = seed_patient(&ctx).await;
        seed_study(&ctx, &patient_id, "Baseline CT", "Small nodule noted.");
        seed_study(&ctx, &patient_id, "Follow-up CT", "Nodule unchanged.");

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/patients/{patient_id}/reports"),
                serde_json::json!({}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let report = response_json(response).await;
        assert!(report["findings"].as_str().unwrap().contains("[CITE:study-a]"));
        let citations = report["citations"].as_object().unwrap();
        assert_eq!(citations.len(), 2);
        assert!(citations.contains_key("cite_1"));

        let response = send(
            &ctx,
            get_request(&format!(
                "/api/patients/{patient_id}/reports/latest?rendered=true"
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let latest = response_json(response).await;

        // First-seen order: study-a is marker 1, study-b is marker 2, and
        // impression reuses the numbering started in findings.
        let findings = latest["rendered"]["findings"].as_array().unwrap();
        let first_marker = findings
            .iter()
            .find(|s| s["type"] == "marker")
            .unwrap();
        assert_eq!(first_marker["id"], "study-a");
        assert_eq!(first_marker["number"], 1);

        let impression = latest["rendered"]["impression"].as_array().unwrap();
        let impression_marker = impression
            .iter()
            .find(|s| s["type"] == "marker")
            .unwrap();
        assert_eq!(impression_marker["id"], "study-b");
        assert_eq!(impression_marker["number"], 2);
    }

    #[tokio::test]
    async fn report_without_studies_is_400() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("{}"),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/patients/{patient_id}/reports"),
                serde_json::json!({}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unusable_report_response_is_502() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("Sorry, I cannot produce a report."),
        );
        let patient_id = seed_patient(&ctx).await;
        seed_study(&ctx, &patient_id, "Chest CT", "Summary.");

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/patients/{patient_id}/reports"),
                serde_json::json!({}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "REPORT_UNPARSEABLE");
    }

    #[tokio::test]
    async fn latest_report_missing_is_404() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("{}"),
        );
        let patient_id = seed_patient(&ctx).await;

        let response = send(
            &ctx,
            get_request(&format!("/api/patients/{patient_id}/reports/latest")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ── chats ──

    async fn seed_chat(ctx: &AppContext, patient_id: &str) -> String {
        let response = send(
            ctx,
            json_request(
                "POST",
                "/api/chats",
                serde_json::json!({"patient_id": patient_id}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let chat = response_json(response).await;
        assert_eq!(chat["title"], "New Chat");
        chat["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn message_turn_streams_and_persists_both_sides() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("").with_stream(vec![
                "The scan ".into(),
                "shows no ".into(),
                "acute findings.".into(),
            ]),
        );
        let patient_id = seed_patient(&ctx).await;
        let chat_id = seed_chat(&ctx, &patient_id).await;

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/chats/{chat_id}/messages"),
                serde_json::json!({"content": "What did my scan show?"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let reply = response_text(response).await;
        assert_eq!(reply, "The scan shows no acute findings.");

        let response = send(&ctx, get_request(&format!("/api/chats/{chat_id}"))).await;
        let detail = response_json(response).await;
        let messages = detail["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "User");
        assert_eq!(messages[0]["content"], "What did my scan show?");
        assert_eq!(messages[1]["role"], "Assistant");
        assert_eq!(messages[1]["content"], "The scan shows no acute findings.");
    }

    #[tokio::test]
    async fn empty_message_is_400() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("reply"),
        );
        let patient_id = seed_patient(&ctx).await;
        let chat_id = seed_chat(&ctx, &patient_id).await;

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/chats/{chat_id}/messages"),
                serde_json::json!({"content": "   "}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn safety_blocked_turn_is_400_with_code() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::failing(ProviderError::SafetyBlocked),
        );
        let patient_id = seed_patient(&ctx).await;
        let chat_id = seed_chat(&ctx, &patient_id).await;

        let response = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/chats/{chat_id}/messages"),
                serde_json::json!({"content": "blocked question"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "SAFETY_BLOCKED");
    }

    #[tokio::test]
    async fn chats_are_listed_per_patient() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("reply"),
        );
        let patient_id = seed_patient(&ctx).await;
        seed_chat(&ctx, &patient_id).await;
        seed_chat(&ctx, &patient_id).await;

        let response = send(
            &ctx,
            get_request(&format!("/api/patients/{patient_id}/chats")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn title_is_generated_and_persisted() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("MRI Result Questions").with_stream(vec!["It shows...".into()]),
        );
        let patient_id = seed_patient(&ctx).await;
        let chat_id = seed_chat(&ctx, &patient_id).await;

        // A full turn first, so the chat has enough content for a title.
        // The body must be drained for the assistant reply to be persisted.
        let turn = send(
            &ctx,
            json_request(
                "POST",
                &format!("/api/chats/{chat_id}/messages"),
                serde_json::json!({"content": "What does my MRI show?"}),
            ),
        )
        .await;
        response_text(turn).await;

        let response = send(
            &ctx,
            Request::builder()
                .method("POST")
                .uri(format!("/api/chats/{chat_id}/title"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["title"], "MRI Result Questions");

        let response = send(&ctx, get_request(&format!("/api/chats/{chat_id}"))).await;
        assert_eq!(response_json(response).await["title"], "MRI Result Questions");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (_dir, ctx) = test_context(
            MockVision::new("specialized", "caption"),
            MockText::new("text"),
        );
        let response = send(&ctx, get_request("/api/nonexistent")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

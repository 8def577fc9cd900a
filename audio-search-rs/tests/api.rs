mod common;

use audio_search::config::Settings;
use audio_search::server::{build_router, AppState, ExamplePrompts};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app(corpus: &Corpus, translator: FakeTranslator) -> Router {
    let pipeline = pipeline_with(corpus, translator, keyword_classifier());
    let prompts = ExamplePrompts::load(&prompts_path()).unwrap();
    let settings = Settings {
        audio_dir: corpus.audio_dir.clone(),
        ..Settings::default()
    };
    build_router(AppState::new(pipeline, prompts), &settings).unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_model_state() {
    let corpus = indexed_corpus();
    let (status, body) = call(app(&corpus, FakeTranslator::default()), get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "model_loaded": true}));
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let corpus = indexed_corpus();
    let (status, body) = call(
        app(&corpus, FakeTranslator::default()),
        post_json("/api/search", json!({"query": "dog bark", "top_k": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["num_results"], 3);
    assert_eq!(body["content_type"], "sfx");
    assert_eq!(body["resolved_query"], "dog bark");
    assert_eq!(body["original_query"], "dog bark");
    assert_eq!(body["was_translated"], false);
    assert!(body["translation_warning"].is_null());
    let top = &body["results"][0];
    assert_eq!(top["filename"], "dog_bark.wav");
    assert_eq!(top["audio_url"], "/audio/animals/dog_bark.wav");
    assert_eq!(top["folder"], "animals");
    assert_eq!(top["content_type"], "sfx");
}

#[tokio::test]
async fn invalid_search_bodies_are_bad_requests() {
    let corpus = indexed_corpus();
    for body in [
        json!({"query": ""}),
        json!({"query": "rain", "top_k": 0}),
        json!({"query": "rain", "top_k": 101}),
        json!({"query": "rain", "content_type": "podcast"}),
        json!({"top_k": 3}),
    ] {
        let (status, resp) = call(
            app(&corpus, FakeTranslator::default()),
            post_json("/api/search", body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn internal_failures_stay_generic() {
    use audio_search::config::TranslationSettings;
    use audio_search::embedding::{Device, EmbeddingProvider};
    use audio_search::{LanguageResolver, QueryEnhancer, SearchPipeline};
    use std::sync::Arc;

    let corpus = indexed_corpus();
    // no model loaded: every embedding call fails
    let pipeline = SearchPipeline::new(
        Arc::new(LanguageResolver::new(
            Arc::new(FakeTranslator::default()),
            &TranslationSettings::default(),
        )),
        keyword_classifier(),
        QueryEnhancer::default(),
        Arc::new(EmbeddingProvider::new(Device::Cpu, 0.0)),
        Arc::new(load_index(&corpus)),
    );
    let router = build_router(
        AppState::new(pipeline, ExamplePrompts::default()),
        &Settings::default(),
    )
    .unwrap();

    let (status, body) = call(
        router.clone(),
        post_json("/api/search", json!({"query": "rain"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"]["message"], "Search service failure");

    let (_, health) = call(router, get("/api/health")).await;
    assert_eq!(health["model_loaded"], false);
}

#[tokio::test]
async fn example_prompts_in_english() {
    let corpus = indexed_corpus();
    let (status, body) = call(
        app(&corpus, FakeTranslator::default()),
        get("/api/example-prompts"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let prompts = body["prompts"].as_array().unwrap();
    assert_eq!(prompts.len(), 4);
    assert!(prompts.iter().any(|p| p["category"] == "Mood/Emotion"));
    assert!(!body["search_tips"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn example_prompts_are_translated() {
    let corpus = indexed_corpus();
    let (status, body) = call(
        app(&corpus, FakeTranslator::default()),
        get("/api/example-prompts?lang=es"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let prompts = body["prompts"].as_array().unwrap();
    assert_eq!(prompts.len(), 4);
    assert!(prompts
        .iter()
        .all(|p| p["text"].as_str().unwrap().starts_with("ES ")));
}

#[tokio::test]
async fn example_prompt_translation_failure_returns_english() {
    let corpus = indexed_corpus();
    let (status, body) = call(
        app(&corpus, FakeTranslator::default().rate_limited()),
        get("/api/example-prompts?lang=es"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first = body["prompts"][0]["text"].as_str().unwrap();
    assert!(!first.starts_with("ES "));
}

#[tokio::test]
async fn audio_files_are_served() {
    let corpus = indexed_corpus();
    let response = app(&corpus, FakeTranslator::default())
        .oneshot(get("/audio/weather/rain_heavy.wav"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..4], b"RIFF");
}

//! Translation providers against a local stand-in for each remote API.

use audio_search::config::TranslationSettings;
use audio_search::translation::providers::{build_provider, ProviderError};
use audio_search::translation::{LanguageResolver, UNAVAILABLE_WARNING};
use axum::{
    extract::Query,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings(provider: &str, url: String, key: Option<&str>) -> TranslationSettings {
    TranslationSettings {
        provider: provider.into(),
        api_url: Some(url),
        api_key: key.map(str::to_string),
        ..TranslationSettings::default()
    }
}

#[tokio::test]
async fn google_cloud_detect_and_translate() {
    let app = Router::new()
        .route(
            "/v2",
            post(
                |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                    assert_eq!(q.get("key").map(String::as_str), Some("secret"));
                    assert_eq!(body["target"], "en");
                    assert_eq!(body["source"], "es");
                    Json(json!({"data": {"translations": [{"translatedText": " heavy rain "}]}}))
                },
            ),
        )
        .route(
            "/v2/detect",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["q"], "lluvia fuerte");
                Json(json!({"data": {"detections": [[{"language": "es", "confidence": 0.97}]]}}))
            }),
        );
    let base = spawn(app).await;
    let provider = build_provider(&settings("google", format!("{base}/v2"), Some("secret"))).unwrap();

    let detection = provider.detect("lluvia fuerte").await.unwrap();
    assert_eq!(detection.lang_code.as_deref(), Some("es"));
    assert!((detection.confidence - 0.97).abs() < 1e-6);
    assert_eq!(
        provider.translate("lluvia fuerte", "es", "en").await.unwrap(),
        "heavy rain"
    );
}

#[tokio::test]
async fn google_cloud_omits_source_for_auto() {
    let app = Router::new().route(
        "/v2",
        post(|Json(body): Json<Value>| async move {
            assert!(body.get("source").is_none());
            Json(json!({"data": {"translations": [{"translatedText": "rain"}]}}))
        }),
    );
    let base = spawn(app).await;
    let provider = build_provider(&settings("google", format!("{base}/v2"), Some("k"))).unwrap();
    assert_eq!(provider.translate("mưa", "auto", "en").await.unwrap(), "rain");
}

#[tokio::test]
async fn google_web_reads_positional_response() {
    let app = Router::new().route(
        "/single",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            assert_eq!(q.get("client").map(String::as_str), Some("gtx"));
            assert_eq!(q.get("tl").map(String::as_str), Some("en"));
            let sl = q.get("sl").cloned().unwrap_or_default();
            Json(json!([
                [["thunder ", "sấm ", null], ["storm", "bão", null]],
                null,
                if sl == "auto" { "vi" } else { sl.as_str() },
                null,
                null,
                null,
                0.93
            ]))
        }),
    );
    let base = spawn(app).await;
    let provider = build_provider(&settings("googletrans", format!("{base}/single"), None)).unwrap();

    let detection = provider.detect("sấm bão").await.unwrap();
    assert_eq!(detection.lang_code.as_deref(), Some("vi"));
    assert!(detection.confidence > 0.9);
    assert_eq!(
        provider.translate("sấm bão", "vi", "en").await.unwrap(),
        "thunder storm"
    );
}

#[tokio::test]
async fn deepl_uppercases_languages_and_reports_source() {
    let app = Router::new().route(
        "/v2/translate",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["auth_key"], "dl-key");
            assert_eq!(body["target_lang"], "EN");
            assert_eq!(body["text"][0], "Regen");
            Json(json!({"translations": [{"detected_source_language": "DE", "text": "rain"}]}))
        }),
    );
    let base = spawn(app).await;
    let provider =
        build_provider(&settings("deepl", format!("{base}/v2/translate"), Some("dl-key"))).unwrap();

    assert_eq!(provider.translate("Regen", "de", "en").await.unwrap(), "rain");
    let detection = provider.detect("Regen").await.unwrap();
    assert_eq!(detection.lang_code.as_deref(), Some("DE"));
}

#[tokio::test]
async fn status_codes_map_to_provider_errors() {
    let app = Router::new()
        .route("/limited", get(|| async { StatusCode::TOO_MANY_REQUESTS }))
        .route(
            "/broken",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        )
        .route("/garbage", get(|| async { "not json" }));
    let base = spawn(app).await;

    let limited = build_provider(&settings("googletrans", format!("{base}/limited"), None)).unwrap();
    assert!(matches!(
        limited.translate("hola", "es", "en").await,
        Err(ProviderError::RateLimited)
    ));

    let broken = build_provider(&settings("googletrans", format!("{base}/broken"), None)).unwrap();
    match broken.translate("hola", "es", "en").await {
        Err(ProviderError::Http { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "upstream down");
        }
        other => panic!("unexpected: {other:?}"),
    }

    let garbage = build_provider(&settings("googletrans", format!("{base}/garbage"), None)).unwrap();
    assert!(matches!(
        garbage.translate("hola", "es", "en").await,
        Err(ProviderError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn slow_provider_times_out_and_search_degrades() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!([[["rain", "lluvia", null]], null, "es"]))
        }),
    );
    let base = spawn(app).await;
    let settings = TranslationSettings {
        timeout_ms: 200,
        ..settings("googletrans", format!("{base}/slow"), None)
    };

    let provider = build_provider(&settings).unwrap();
    assert!(matches!(
        provider.translate("lluvia", "es", "en").await,
        Err(ProviderError::Timeout)
    ));

    let resolver = LanguageResolver::from_settings(&settings).unwrap();
    let q = resolver.detect_and_translate("lluvia fuerte ñ").await;
    assert!(!q.was_translated);
    assert_eq!(q.english_text, "lluvia fuerte ñ");
    assert_eq!(q.translation_warning.as_deref(), Some(UNAVAILABLE_WARNING));
}

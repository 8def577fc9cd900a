mod common;

use audio_search::translation::{RATE_LIMIT_WARNING, UNAVAILABLE_WARNING};
use audio_search::{ContentType, PipelineError, SearchRequest};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn english_music_query_routes_to_songs() {
    let corpus = indexed_corpus();
    let pipeline = pipeline_with(&corpus, FakeTranslator::default(), keyword_classifier());

    let response = pipeline
        .search(SearchRequest::new("relaxing piano music"))
        .await
        .unwrap();

    assert_eq!(response.content_type, ContentType::Song);
    assert!(!response.was_translated);
    assert_eq!(response.original_query, "relaxing piano music");
    assert_eq!(response.resolved_query, "relaxing piano music");
    assert!(response.translation_warning.is_none());
    assert_eq!(response.num_results, 5);
    assert!(response
        .results
        .iter()
        .all(|r| r.content_type == ContentType::Song && (0.0..=1.0).contains(&r.similarity)));
}

#[tokio::test]
async fn explicit_content_type_skips_the_classifier() {
    let corpus = indexed_corpus();
    let classifier = Arc::new(CountingClassifier::default());
    let pipeline = pipeline_with(&corpus, FakeTranslator::default(), classifier.clone());

    let response = pipeline
        .search(SearchRequest::new("relaxing piano music").with_content_type(ContentType::Sfx))
        .await
        .unwrap();

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.content_type, ContentType::Sfx);
    assert!(response.results.iter().all(|r| r.content_type == ContentType::Sfx));

    pipeline.search(SearchRequest::new("rain")).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn named_files_rank_first_and_carry_folders() {
    let corpus = indexed_corpus();
    let pipeline = pipeline_with(&corpus, FakeTranslator::default(), keyword_classifier());

    let response = pipeline
        .search(SearchRequest::new("heavy rain").with_top_k(2))
        .await
        .unwrap();

    assert_eq!(response.content_type, ContentType::Sfx);
    assert_eq!(response.num_results, 2);
    let top = &response.results[0];
    assert_eq!(top.filename, "rain_heavy.wav");
    assert_eq!(top.audio_url, "/audio/weather/rain_heavy.wav");
    assert_eq!(top.folder, "weather");
    assert!(response.results[0].similarity >= response.results[1].similarity);
}

#[tokio::test]
async fn foreign_queries_are_translated_before_routing() {
    let corpus = indexed_corpus();
    let translator = FakeTranslator::default()
        .detects("lluvia fuerte", "es", 0.98)
        .translates("lluvia fuerte", "heavy rain");
    let pipeline = pipeline_with(&corpus, translator, keyword_classifier());

    let response = pipeline
        .search(SearchRequest::new("lluvia fuerte"))
        .await
        .unwrap();

    assert!(response.was_translated);
    assert_eq!(response.resolved_query, "heavy rain");
    assert_eq!(response.original_query, "lluvia fuerte");
    assert_eq!(response.content_type, ContentType::Sfx);
    assert_eq!(response.results[0].filename, "rain_heavy.wav");
}

#[tokio::test]
async fn translation_failures_degrade_to_the_original_text() {
    let corpus = indexed_corpus();

    let translator = FakeTranslator::default()
        .detects("lluvia fuerte", "es", 0.98)
        .rate_limited();
    let pipeline = pipeline_with(&corpus, translator, keyword_classifier());
    let response = pipeline
        .search(SearchRequest::new("lluvia fuerte"))
        .await
        .unwrap();
    assert!(!response.was_translated);
    assert_eq!(response.resolved_query, "lluvia fuerte");
    assert_eq!(response.translation_warning.as_deref(), Some(RATE_LIMIT_WARNING));

    let translator = FakeTranslator::default().detects("trueno", "es", 0.9);
    let pipeline = pipeline_with(&corpus, translator, keyword_classifier());
    let response = pipeline.search(SearchRequest::new("trueno")).await.unwrap();
    assert_eq!(response.translation_warning.as_deref(), Some(UNAVAILABLE_WARNING));
    assert!(!response.results.is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_searching() {
    let corpus = indexed_corpus();
    let pipeline = pipeline_with(&corpus, FakeTranslator::default(), keyword_classifier());

    assert!(matches!(
        pipeline.search(SearchRequest::new("")).await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        pipeline.search(SearchRequest::new("x".repeat(501))).await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        pipeline.search(SearchRequest::new("rain").with_top_k(0)).await,
        Err(PipelineError::InvalidRequest(_))
    ));
    assert!(matches!(
        pipeline.search(SearchRequest::new("rain").with_top_k(101)).await,
        Err(PipelineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn top_k_larger_than_the_corpus_is_clamped() {
    let corpus = indexed_corpus();
    let pipeline = pipeline_with(&corpus, FakeTranslator::default(), keyword_classifier());
    let response = pipeline
        .search(SearchRequest::new("thunder").with_top_k(100))
        .await
        .unwrap();
    assert_eq!(response.num_results, CORPUS.len());
}

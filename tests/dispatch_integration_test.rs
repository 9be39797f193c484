//! End-to-end dispatch pipeline tests: registration, pattern routing,
//! worker processing, sink delivery, error isolation, and teardown.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use page_dispatch::envelope::TextParsedDetails;
use page_dispatch::error::{DispatchError, DispatchResult};
use page_dispatch::patterns::MatchPatternSet;
use page_dispatch::registry::sink_listener;
use page_dispatch::sink::MemorySink;
use page_dispatch::worker::PageProcessor;

use common::{example_page, pipeline_with_modules, PAGE_CONTENT_MODULE};

#[tokio::test]
async fn test_page_content_scenario() {
    let (pipeline, sink) = pipeline_with_modules(&[]);

    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    pipeline.emit(example_page("p1"));

    let results = sink.wait_for_results(1).await;
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert_eq!(result.worker_name, "page-content");
    assert_eq!(result.url, "https://example.com");
    assert_eq!(result.page_id, "p1");
    assert_eq!(result.data, json!({"title": "Example", "textContent": "hello"}));

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_non_matching_url_delivers_nothing() {
    let (pipeline, sink) = pipeline_with_modules(&[]);

    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["*://*.mozilla.org/*"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    pipeline.emit(TextParsedDetails::new(
        "https://other.org",
        "p1",
        "Other",
        "body",
    ));

    // Matching traffic still flows afterwards, proving the event above was
    // filtered rather than lost in transit.
    pipeline.emit(TextParsedDetails::new(
        "https://www.mozilla.org/firefox/",
        "p2",
        "Firefox",
        "body",
    ));

    let results = sink.wait_for_results(1).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].page_id, "p2");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_overlapping_registrations_each_get_a_copy() {
    let (pipeline, _sink) = pipeline_with_modules(&[]);
    let content_sink = Arc::new(MemorySink::new());
    let mozilla_sink = Arc::new(MemorySink::new());

    let all = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "all-pages",
            json!({}),
            sink_listener(content_sink.clone()),
        )
        .unwrap();
    let mozilla = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["*://*.mozilla.org/*"]).unwrap(),
            "mozilla-pages",
            json!({}),
            sink_listener(mozilla_sink.clone()),
        )
        .unwrap();
    all.wait_ready().await.unwrap();
    mozilla.wait_ready().await.unwrap();

    pipeline.emit(TextParsedDetails::new(
        "https://www.mozilla.org/",
        "p1",
        "Mozilla",
        "body",
    ));

    let content_results = content_sink.wait_for_results(1).await;
    let mozilla_results = mozilla_sink.wait_for_results(1).await;
    assert_eq!(content_results.len(), 1);
    assert_eq!(mozilla_results.len(), 1);
    assert_eq!(content_results[0].worker_name, "all-pages");
    assert_eq!(mozilla_results[0].worker_name, "mozilla-pages");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_reach_worker_in_source_order() {
    let (pipeline, sink) = pipeline_with_modules(&[]);

    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    for i in 0..10 {
        pipeline.emit(example_page(&format!("p{i}")));
    }

    let results = sink.wait_for_results(10).await;
    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.page_id, format!("p{i}"));
    }

    pipeline.shutdown().await.unwrap();
}

struct ThresholdClassifier;

#[async_trait]
impl PageProcessor for ThresholdClassifier {
    async fn init(&self, args: &Value) -> DispatchResult<()> {
        if args.get("threshold").is_none() {
            return Err(DispatchError::configuration("classifier needs a threshold"));
        }
        Ok(())
    }

    async fn process(&self, details: &TextParsedDetails) -> DispatchResult<Value> {
        if details.url.contains("crash") {
            return Err(DispatchError::internal("model inference failed"));
        }
        Ok(json!({"label": "news", "confidence": 0.9}))
    }
}

#[tokio::test]
async fn test_failing_processor_keeps_pipeline_responsive() {
    let classifier: Arc<dyn PageProcessor> = Arc::new(ThresholdClassifier);
    let (pipeline, sink) =
        pipeline_with_modules(&[("/dist/classifier.worker.js", classifier)]);

    let handle = pipeline
        .register_worker(
            "/dist/classifier.worker.js",
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "classifier",
            json!({"threshold": 0.5}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    pipeline.emit(TextParsedDetails::new(
        "https://crash.example.com",
        "p1",
        "Crash",
        "body",
    ));
    pipeline.emit(example_page("p2"));

    // The failed event produced nothing; the next one still flowed through.
    let results = sink.wait_for_results(1).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].page_id, "p2");
    assert_eq!(results[0].data["label"], "news");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_init_data_reaches_the_processor() {
    let classifier: Arc<dyn PageProcessor> = Arc::new(ThresholdClassifier);
    let (pipeline, sink) =
        pipeline_with_modules(&[("/dist/classifier.worker.js", classifier)]);

    // Missing init data: the worker fails initialization and readiness is
    // reported as an error.
    let handle = pipeline
        .register_worker(
            "/dist/classifier.worker.js",
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "classifier",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    assert!(handle.wait_ready().await.is_err());

    pipeline.emit(example_page("p1"));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(sink.results().is_empty());

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_registration_fails_cleanly() {
    let (pipeline, sink) = pipeline_with_modules(&[]);

    pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();

    let err = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::DuplicateRegistration { .. }));

    // The original registration still works.
    pipeline
        .registry()
        .info("page-content")
        .unwrap();
    pipeline.emit(example_page("p1"));
    assert_eq!(sink.wait_for_results(1).await.len(), 1);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unregister_then_reregister_same_name() {
    let (pipeline, sink) = pipeline_with_modules(&[]);

    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    assert!(pipeline.unregister_worker("page-content").await.unwrap());

    // The name is free again after teardown.
    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink.clone()),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    pipeline.emit(example_page("p1"));
    assert_eq!(sink.wait_for_results(1).await.len(), 1);

    pipeline.shutdown().await.unwrap();
}

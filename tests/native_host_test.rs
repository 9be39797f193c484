//! Pipeline → native host handoff: results serialized into the
//! delimiter-joined payload and framed over a native-messaging channel.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use page_dispatch::native::{read_message, write_message, FramedNativeHost};
use page_dispatch::patterns::MatchPatternSet;
use page_dispatch::registry::sink_listener;
use page_dispatch::sink::NativeHostSink;

use common::{example_page, pipeline_with_modules, PAGE_CONTENT_MODULE};

#[tokio::test]
async fn test_result_is_handed_to_native_host() {
    let (host_side, extension_side) = tokio::io::duplex(64 * 1024);
    let (mut host_read, mut host_write) = tokio::io::split(host_side);
    let (ext_read, ext_write) = tokio::io::split(extension_side);

    // Fake savePageData host: acknowledge each payload and record it.
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Ok(message) = read_message(&mut host_read).await {
            if let Value::String(payload) = message {
                let _ = seen_tx.send(payload);
            }
            if write_message(&mut host_write, &Value::String("Got it!".to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let host = Arc::new(FramedNativeHost::new("save_page_data", ext_read, ext_write));
    let sink = Arc::new(NativeHostSink::new(host));

    let (pipeline, _unused) = pipeline_with_modules(&[]);
    let handle = pipeline
        .register_worker(
            PAGE_CONTENT_MODULE,
            MatchPatternSet::parse(&["<all_urls>"]).unwrap(),
            "page-content",
            json!({}),
            sink_listener(sink),
        )
        .unwrap();
    handle.wait_ready().await.unwrap();

    pipeline.emit(example_page("p1"));

    let payload = timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, "https://example.com&&&&&Example&&&&&hello");

    pipeline.shutdown().await.unwrap();
}

//! Shared helpers for dispatch pipeline integration tests.

use std::sync::Arc;

use page_dispatch::config::DispatchConfig;
use page_dispatch::envelope::TextParsedDetails;
use page_dispatch::pipeline::DispatchPipeline;
use page_dispatch::sink::MemorySink;
use page_dispatch::worker::{ModuleLoader, PageContentProcessor, PageProcessor};

pub const PAGE_CONTENT_MODULE: &str = "/dist/pageContents.worker.js";

/// Build a pipeline with the page-content module preloaded, plus any extra
/// modules the test needs.
pub fn pipeline_with_modules(
    extra: &[(&str, Arc<dyn PageProcessor>)],
) -> (DispatchPipeline, Arc<MemorySink>) {
    let loader = Arc::new(ModuleLoader::new());
    loader.register_module(PAGE_CONTENT_MODULE, Arc::new(PageContentProcessor));
    for (path, processor) in extra {
        loader.register_module(*path, Arc::clone(processor));
    }

    let pipeline = DispatchPipeline::new(DispatchConfig::default(), loader);
    (pipeline, Arc::new(MemorySink::new()))
}

pub fn example_page(page_id: &str) -> TextParsedDetails {
    TextParsedDetails::new("https://example.com", page_id, "Example", "hello")
}

//! Progress-callback trait for long-running pipeline stages.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as each stage works through its units (PDFs, documents, pages,
//! batches).
//!
//! # Why callbacks instead of channels?
//!
//! The library does not know whether it runs under a terminal progress bar,
//! a web job runner or a test. A callback is the least-invasive hook: the
//! host decides what to do with each event. The trait is `Send + Sync` because
//! documents and batches are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tarifarios::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, item: &str, _detail: &str) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}: {item}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by pipeline stages as they process their units of work.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_item_*` and `on_page_complete` may be called
/// concurrently from different tasks.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when a stage knows how many units it will process.
    ///
    /// # Arguments
    /// * `stage`: stage name (`"download"`, `"ocr"`, `"normalize"`, …)
    /// * `total`: units that will be attempted
    fn on_stage_start(&self, stage: &str, total: usize) {
        let _ = (stage, total);
    }

    /// Called just before a unit (PDF, document, batch) is started.
    fn on_item_start(&self, item: &str) {
        let _ = item;
    }

    /// Called after each OCR'd page of a document.
    ///
    /// # Arguments
    /// * `item`: `bank/document` key
    /// * `page`: 1-indexed page number
    /// * `total`: pages in the document
    fn on_page_complete(&self, item: &str, page: usize, total: usize) {
        let _ = (item, page, total);
    }

    /// Called when a unit succeeds; `detail` is a short human summary.
    fn on_item_complete(&self, item: &str, detail: &str) {
        let _ = (item, detail);
    }

    /// Called when a unit fails; the stage continues with the next one.
    fn on_item_error(&self, item: &str, error: &str) {
        let _ = (item, error);
    }

    /// Called once after the stage has attempted every unit.
    fn on_stage_complete(&self, stage: &str, total: usize, success: usize) {
        let _ = (stage, total, success);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stage_total: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        pages: AtomicUsize,
        last_stage: Mutex<String>,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: &str, total: usize) {
            self.stage_total.store(total, Ordering::SeqCst);
            *self.last_stage.lock().unwrap() = stage.to_string();
        }

        fn on_page_complete(&self, _item: &str, _page: usize, _total: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _item: &str, _detail: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _item: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start("ocr", 5);
        cb.on_item_start("BCP/doc");
        cb.on_page_complete("BCP/doc", 1, 5);
        cb.on_item_complete("BCP/doc", "5 pages");
        cb.on_item_error("BCP/other", "boom");
        cb.on_stage_complete("ocr", 5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_start("normalize", 3);
        tracker.on_item_complete("BCP/batch_001.txt", "10 docs");
        tracker.on_item_complete("BCP/batch_002.txt", "4 docs");
        tracker.on_item_error("BCP/batch_003.txt", "invalid JSON");
        tracker.on_page_complete("BCP/doc", 1, 2);

        assert_eq!(tracker.stage_total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.last_stage.lock().unwrap(), "normalize");
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start("download", 10);
        cb.on_item_complete("x.pdf", "12 KB");
    }
}

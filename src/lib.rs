// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod classifier;
pub mod config;
pub mod feedback;
pub mod ingest;
pub mod jobs;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod window;

// ---- Re-exports for a stable public API ----
pub use crate::classifier::Classifier;
pub use crate::feedback::FeedbackLoop;
pub use crate::ingest::FeedPipeline;
pub use crate::notify::{FeedbackChannel, Notifier, NotifierMux, Verdict};
pub use crate::scheduler::{Job, Scheduler};
pub use crate::store::{Label, MemoryStore, Store};

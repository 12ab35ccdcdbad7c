//! The concurrent fetch-and-reconcile pipeline.
//!
//! - [`index`] - Run-scoped dedup state (feed URLs, slugs, episode GUIDs)
//! - [`reconcile`] - Insert-vs-update decisions for one parsed feed
//! - [`scheduler`] - Batching, admission control and the run deadline

mod index;
mod reconcile;
mod scheduler;

pub use index::{DedupIndex, PodcastClaim};
pub use reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
pub use scheduler::{deadline_token, run, PipelineSettings, RunSummary};

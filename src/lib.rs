//! Batch ingestion of podcast feeds into a SQLite catalogue.
//!
//! The pipeline reads a list of feed URLs, fetches and parses each feed under
//! a timeout, and reconciles the result against stored podcasts and episodes:
//! new podcasts are inserted with a collision-free slug, known podcasts get
//! their descriptive fields refreshed, and only episodes with an unseen GUID
//! are written.
//!
//! - [`feed`] - input list loading, HTTP fetching and RSS/Atom parsing
//! - [`ingest`] - dedup index, reconciler and batch scheduler
//! - [`storage`] - SQLite persistence for podcasts and episodes
//! - [`util`] - slug generation and URL validation

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;

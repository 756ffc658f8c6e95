//! # rustpapers
//!
//! OpenAlex Papers Tracking Pipeline - Rust Microservice
//!
//! ## Modules
//!
//! - [`openalex`] - OpenAlex API client with topic resolution, paging, retry
//! - [`normalize`] - Raw work JSON to flat row mapping
//! - [`store`] - SQLite persistence with deduplicating upserts
//! - [`snapshot`] - Raw response snapshots on disk
//! - [`pipeline`] - Fetch, snapshot, and load orchestration
//! - [`quality`] - Post-load data quality checks
//! - [`stats`] - Dashboard aggregates
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustpapers::openalex::OpenAlexClient;
//! use rustpapers::pipeline::{self, PipelineOptions};
//! use rustpapers::store::PaperStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OpenAlexClient::new()?;
//!     let store = PaperStore::open_in_memory()?;
//!     let summary = pipeline::run(&client, &store, &PipelineOptions::default()).await?;
//!     println!("Upserted {} papers", summary.report.upserted);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod normalize;
pub mod openalex;
pub mod pipeline;
pub mod quality;
pub mod snapshot;
pub mod stats;
pub mod store;

pub use error::{PapersError, Result};

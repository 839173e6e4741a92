//! # Snapshot Runner
//!
//! Scripted, multi-viewport website screenshot runner. A run configuration
//! lists screens (a URL, a capture mode and per-viewport action scripts);
//! the runner drives headless Chrome through each screen at desktop and
//! mobile sizes, replays the authored actions, forces lazy content to load
//! and writes one screenshot per screen and viewport.
//!
//! ## Pipeline
//!
//! | Stage | Component | Notes |
//! |-------|-----------|-------|
//! | Batching | [`BatchScheduler`] | Fixed-width batches, one browser per screen |
//! | Per viewport | [`ViewportTaskRunner`] | Viewport setup, navigation, retries |
//! | Actions | [`ActionEngine`] | Twelve action kinds, three-tier click fallback |
//! | Lazy content | [`LazyContentTrigger`] | Scroll sweeps until the page stops growing |
//! | Capture | [`CaptureEngine`] | Full page, viewport or selector-bounded with crop |
//!
//! Browser control sits behind the [`PageDriver`], [`BrowserSession`] and
//! [`BrowserLauncher`] traits; [`CdpLauncher`] is the Chrome DevTools
//! implementation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapshot_runner::{BatchScheduler, CdpLauncher, Config, Metrics, RunConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let launcher = Arc::new(CdpLauncher::new(config.clone()));
//!     let scheduler = BatchScheduler::new(config, Arc::new(Metrics::new()), launcher);
//!
//!     let run = RunConfig::from_json(&std::fs::read_to_string("site.json")?)?;
//!     let report = scheduler.run(run).await?;
//!     println!("{} of {} screens captured", report.summary.successful, report.summary.total);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! snapshot-runner run --config site.json --output snapshots/
//! snapshot-runner screen --config site.json --id home
//! snapshot-runner validate --config site.json
//! ```

/// Configuration and settings for the runner
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Screen and capture-mode data model
pub mod screen;

/// Browser automation seam
pub mod page;

/// Chrome DevTools implementation of the automation seam
pub mod cdp;

/// In-page scripts evaluated by the engines
pub mod scripts;

/// Scripted page actions
pub mod action;

/// Lazy-content trigger
pub mod lazy_load;

/// Screenshot capture
pub mod capture;

/// Per-viewport task execution with retries
pub mod runner;

/// Batch scheduling across screens
pub mod scheduler;

/// Run log and live previews
pub mod events;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod test_support;


pub use action::*;
pub use capture::*;
pub use cdp::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use lazy_load::*;
pub use metrics::*;
pub use page::*;
pub use runner::*;
pub use scheduler::*;
pub use screen::*;
pub use utils::*;

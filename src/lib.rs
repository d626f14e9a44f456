//! Kaizen: an autonomous continuous-improvement engine.
//!
//! A session repeatedly moves through six phases (introspecting,
//! proposing, reviewing, architect, executing, learning). A detector
//! finds an opportunity in the target codebase and a generator turns it
//! into a diff. A three-member review council votes on the diff, an
//! architect supervisor applies the mode's approval threshold, and an
//! executor applies the change. Results feed durable global statistics.
//!
//! Alongside sessions, [`jobs`] exposes the same pipeline one change at a
//! time with explicit human approval.
//!
//! ```
//! use kaizen::models::Mode;
//!
//! let mode: Mode = "conservative".parse().unwrap();
//! assert_eq!(mode.default_threshold(), 0.80);
//! ```

pub mod app;
pub mod architect;
pub mod config;
pub mod council;
pub mod engine;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;

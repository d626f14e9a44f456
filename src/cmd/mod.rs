//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `serve`   | `Serve`                 |
//! | `run`     | `Run`                   |
//! | `analyze` | `Analyze`               |
//! | `jobs`    | `Jobs`                  |
//! | `stats`   | `Stats`                 |
//! | `config`  | `Config`                |

pub mod analyze;
pub mod config;
pub mod jobs;
pub mod run;
pub mod serve;
pub mod stats;

pub use analyze::cmd_analyze;
pub use config::cmd_config;
pub use jobs::cmd_jobs;
pub use run::cmd_run;
pub use serve::cmd_serve;
pub use stats::cmd_stats;

/// Shorten an id for table output.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

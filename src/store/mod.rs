//! Durable engine state on SQLite.

pub mod db;

pub use db::{DbHandle, KaizenDb};

//! Series reconciliation library - shared modules for both binaries.
//!
//! `fetch-issues` pulls a volume's issues from Comic Vine into a results
//! document; `series-reconcile` matches them to Calibre books by inferred
//! series index and writes the resulting metadata patches back.

pub mod canonical;
pub mod catalog;
pub mod config;
pub mod index;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod progress;
pub mod reconcile;
pub mod store;

//! Interfaces to Google Cloud.

mod auth;
pub mod bigquery;
mod client;
pub mod storage;

pub use bigquery::BigQuery;
pub(crate) use client::*;
pub use storage::CloudStorage;

//! Interfaces to cloud providers.

pub mod gcloud;

//! Domain types
//!
//! Core business entities shared between the provider clients and the
//! orchestration stages. Structure only; provisioning and streaming logic
//! lives in the runner, provider communication in the gcloud crate.

pub mod instance;
pub mod run;
pub mod snapshot;

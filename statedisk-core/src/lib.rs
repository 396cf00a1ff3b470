//! Statedisk Core
//!
//! Core types and abstractions for the statedisk snapshot orchestrator.
//!
//! This crate contains:
//! - Domain types: runs, ephemeral instances, disk snapshots, handoff records
//! - Deterministic naming for instances and snapshot images
//! - The change-decision gate for snapshot regeneration
//! - The shared error taxonomy for orchestration runs

pub mod change;
pub mod domain;
pub mod error;
pub mod naming;

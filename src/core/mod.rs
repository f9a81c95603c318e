// src/core/mod.rs

// The assessment engine: everything below the HTTP layer.

/// Shared data types: probe kinds, payloads, results and the score.
pub mod models;

/// Domain input canonicalization and validation.
pub mod domain;

pub mod error;

/// Probe backends and the registry that dispatches to them.
pub mod scanner;

/// The static table of findings and their remediation text.
pub mod knowledge_base;

pub mod recommendations;
pub mod runner;
pub mod orchestrator;
pub mod report;
pub mod cache;
pub mod rate_limiter;

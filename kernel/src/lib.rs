//! Ramify Kernel - orchestration core for Git branching workflows.
//!
//! This crate provides the long-lived, in-process part of Ramify: a session
//! registry, a bounded event bus, per-branch snapshot retention, parallel
//! "quantum" approach execution with scoring, and a lifecycle supervisor that
//! runs the background loops and stops them within a bounded time.
//!
//! Git plumbing, storage and notifications are collaborators behind traits in
//! [`collaborators`]; in-memory implementations ship with the crate.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// External collaborator interfaces and in-memory implementations.
pub mod collaborators;
/// Error types shared by the orchestration core.
pub mod error;
/// Bounded event bus and built-in processors.
pub mod events;
/// Infrastructure components (config, telemetry, audit).
pub mod infrastructure;
/// Quantum branches: concurrent approach execution and selection.
pub mod quantum;
/// Session registry.
pub mod session;
/// Per-branch snapshot retention.
pub mod snapshot;
/// Lifecycle supervision of the background loops.
pub mod supervisor;

pub use error::{OrchestrationError, ResourceKind, Result, ValidationError};

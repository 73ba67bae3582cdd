//! # cairn-runtime
//!
//! Drives declared components through their lifecycle.
//!
//! Handles:
//! - **Component**: The lifecycle contract provisioners implement.
//! - **Registry**: Type name to provisioner factory mapping.
//! - **Context**: Identity, logging and registry access for lifecycle calls.
//! - **Tree**: Expanding a manifest into an arena of instances.
//! - **State**: Persisted per-instance entries (memory and JSON file stores).
//! - **Planner**: Dependency graph construction and diffing against state.
//! - **Engine**: Ordered, optionally concurrent deploy and teardown.
//! - **Report**: Per-instance outcomes of a run.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod builtin;
pub mod component;
pub mod context;
pub mod engine;
pub mod planner;
pub mod registry;
pub mod report;
pub mod state;
pub mod tree;

//! # cairn-compose
//!
//! Declared configuration and the static analysis performed on it before
//! anything is provisioned.
//!
//! Handles:
//! - **Spec**: `ComponentSpec` trees and root manifests loaded from YAML or JSON.
//! - **Variable**: The `${path}` expression parser.
//! - **Input**: Input values parsed into explicit literal/reference trees.
//! - **Resolver**: Binding references to instances and substituting outputs.
//! - **Graph**: Dependency graph construction, cycle detection, and ordering.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod graph;
pub mod input;
pub mod resolver;
pub mod spec;
pub mod variable;

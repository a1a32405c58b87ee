//! Operation-tree construction for Trellis
//!
//! This crate holds the bound statement/expression model the hosting binder
//! hands to Trellis, and the tree-shaping pass that turns it into a
//! best-effort operation tree: declarator groups normalized, resource
//! bindings classified, structurally illegal placements diagnosed. The
//! control-flow graph in `trellis-flow` is built on top of the tree this
//! crate produces.
//!
//! Semantic errors never abort the pass; constructs degrade to a
//! no-cleanup shape and the diagnostics land in the caller's sink.

pub mod decl;
pub mod ir;
pub mod lower;
pub mod resource;
pub mod validate;

// Test support: a canned semantic model for unit tests and examples.
pub mod testing;

// Re-export the tree model and main entry points
pub use ir::*;
pub use lower::lower_block;
pub use resource::{classify, Classified, ResourceBinding};

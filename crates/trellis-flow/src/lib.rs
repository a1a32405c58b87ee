//! Control-flow graph construction for Trellis
//!
//! Takes the operation tree produced by `trellis-ops` and builds a graph
//! of basic blocks annotated with regions: local/capture scopes and the
//! try/finally pairs synthesized around resources. Every edge records the
//! regions it enters and leaves and the finally regions that run on the
//! transfer, so disposal order is readable straight off the graph.
//!
//! The jump-safety checks live here too; like all semantic errors they
//! diagnose without suppressing the offending edges.

mod builder;
mod cleanup;

pub mod error;
pub mod goto;
pub mod graph;
pub mod regions;

pub use error::FlowError;
pub use graph::{
    BasicBlock, BlockId, BlockKind, Branch, BranchKind, Conditional, ControlFlowGraph, Step,
    ENTRY, EXIT,
};
pub use regions::{Region, RegionArena, RegionId, RegionKind};

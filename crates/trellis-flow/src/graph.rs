//! Basic blocks, edges, and the finished graph.

use anyhow::{Context, Result};
use trellis_diagnostics::Diagnostics;
use trellis_ops::{BlockBody, Expr};
use trellis_types::{CaptureId, LocalId};

use crate::builder::GraphBuilder;
use crate::regions::{RegionArena, RegionId};

pub type BlockId = usize;

/// Role of a block in the graph. Entry and exit are synthesized; every
/// graph has exactly one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    Block,
    Exit,
}

/// One side-effecting step inside a block.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write of a write-once flow-capture slot
    Capture { id: CaptureId, value: Expr },
    /// Assignment to a declared local
    Assign { target: LocalId, value: Expr },
    /// Expression evaluated for effect
    Eval(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Ordinary control transfer
    Regular,
    /// Implicit exit of a finally region; carries no target and no
    /// annotations
    StructuredExceptionHandling,
}

/// An outgoing edge. Region annotations are filled in by the finish pass:
/// `leaving` lists left regions innermost first, `entering` lists entered
/// regions outermost first, and `finalizing` lists the finally regions run
/// on this transfer in execution order.
#[derive(Debug, Clone)]
pub struct Branch {
    pub kind: BranchKind,
    pub target: Option<BlockId>,
    pub entering: Vec<RegionId>,
    pub leaving: Vec<RegionId>,
    pub finalizing: Vec<RegionId>,
}

impl Branch {
    pub(crate) fn to(target: BlockId) -> Self {
        Branch {
            kind: BranchKind::Regular,
            target: Some(target),
            entering: Vec::new(),
            leaving: Vec::new(),
            finalizing: Vec::new(),
        }
    }

    /// A regular branch whose target label is resolved at finish time.
    pub(crate) fn pending() -> Self {
        Branch {
            kind: BranchKind::Regular,
            target: None,
            entering: Vec::new(),
            leaving: Vec::new(),
            finalizing: Vec::new(),
        }
    }

    pub(crate) fn structured_exception_handling() -> Self {
        Branch {
            kind: BranchKind::StructuredExceptionHandling,
            target: None,
            entering: Vec::new(),
            leaving: Vec::new(),
            finalizing: Vec::new(),
        }
    }
}

/// A conditional jump taken ahead of the block's fall-through edge: control
/// transfers along `branch` when `condition` evaluates to `jump_if`.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub condition: Expr,
    pub jump_if: bool,
    pub branch: Branch,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub steps: Vec<Step>,
    pub conditional: Option<Conditional>,
    /// Fall-through or unconditional successor; `None` only on exit
    pub next: Option<Branch>,
    /// Regular predecessors; finally blocks have none
    pub predecessors: Vec<BlockId>,
    pub region: RegionId,
    pub is_reachable: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, kind: BlockKind, region: RegionId) -> Self {
        Self {
            id,
            kind,
            steps: Vec::new(),
            conditional: None,
            next: None,
            predecessors: Vec::new(),
            region,
            is_reachable: false,
        }
    }

    /// Whether this block transfers control anywhere at all.
    pub fn is_terminated(&self) -> bool {
        self.next.is_some()
    }
}

/// The finished control-flow graph.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    pub regions: RegionArena,
}

pub const ENTRY: BlockId = 0;
pub const EXIT: BlockId = 1;

impl ControlFlowGraph {
    /// Build the graph for a lowered body. The body must have gone through
    /// `trellis_ops::lower_block` so every resource carries its binding.
    pub fn build(body: &BlockBody, diags: &mut Diagnostics) -> Result<ControlFlowGraph> {
        GraphBuilder::run(body, diags).context("constructing control-flow graph")
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[ENTRY]
    }

    pub fn exit(&self) -> &BasicBlock {
        &self.blocks[EXIT]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    /// Blocks reachable from entry, in id order.
    pub fn reachable_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| b.is_reachable)
    }
}

//! Region arena
//!
//! Regions annotate the graph with the lexical structure the blocks came
//! from: local/capture scopes and the try/finally pairs synthesized for
//! resources. Regions form a tree rooted at [`RegionArena::ROOT`]; every
//! block belongs to exactly one region, and edge annotations are derived
//! from the region chains of the two endpoint blocks.

use trellis_types::{CaptureId, LocalId};

use crate::graph::BlockId;

pub type RegionId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    /// The whole-graph region holding entry and exit
    Root,
    /// Scope of declared locals and/or flow captures
    Locals {
        locals: Vec<LocalId>,
        captures: Vec<CaptureId>,
    },
    /// One resource's scaffold: exactly two children, a `Try` then a `Finally`
    TryAndFinally,
    /// Protected body of a scaffold
    Try,
    /// Cleanup code of a scaffold; entered implicitly, exits through a
    /// structured-exception-handling edge
    Finally,
}

#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    pub parent: Option<RegionId>,
    pub children: Vec<RegionId>,
    pub blocks: Vec<BlockId>,
}

/// Flat arena of regions; ids are indices, allocated monotonically.
#[derive(Debug, Clone)]
pub struct RegionArena {
    regions: Vec<Region>,
}

impl RegionArena {
    pub const ROOT: RegionId = 0;

    pub fn new() -> Self {
        Self {
            regions: vec![Region {
                id: Self::ROOT,
                kind: RegionKind::Root,
                parent: None,
                children: Vec::new(),
                blocks: Vec::new(),
            }],
        }
    }

    /// Allocate a region under `parent`.
    pub fn alloc(&mut self, kind: RegionKind, parent: RegionId) -> RegionId {
        let id = self.regions.len();
        self.regions.push(Region {
            id,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            blocks: Vec::new(),
        });
        self.regions[parent].children.push(id);
        id
    }

    pub fn get(&self, id: RegionId) -> &Region {
        &self.regions[id]
    }

    pub fn get_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// The chain from the root down to `id`, inclusive.
    pub fn chain(&self, id: RegionId) -> Vec<RegionId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(r) = cursor {
            chain.push(r);
            cursor = self.regions[r].parent;
        }
        chain.reverse();
        chain
    }

    /// Regions an edge from `from` to `to` leaves (innermost first) and
    /// enters (outermost first).
    pub fn edge_transition(&self, from: RegionId, to: RegionId) -> (Vec<RegionId>, Vec<RegionId>) {
        let from_chain = self.chain(from);
        let to_chain = self.chain(to);
        let common = from_chain
            .iter()
            .zip(to_chain.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut leaving: Vec<RegionId> = from_chain[common..].to_vec();
        leaving.reverse();
        let entering = to_chain[common..].to_vec();
        (leaving, entering)
    }

    /// The `Finally` paired with `try_region` under their shared
    /// `TryAndFinally`, if `try_region` is in fact a `Try`.
    pub fn paired_finally(&self, try_region: RegionId) -> Option<RegionId> {
        if self.regions[try_region].kind != RegionKind::Try {
            return None;
        }
        let parent = self.regions[try_region].parent?;
        self.regions[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.regions[c].kind == RegionKind::Finally)
    }

    /// Every block in `id`'s subtree, in allocation order per region.
    pub fn blocks_in_subtree(&self, id: RegionId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(r) = stack.pop() {
            out.extend_from_slice(&self.regions[r].blocks);
            stack.extend_from_slice(&self.regions[r].children);
        }
        out
    }
}

impl Default for RegionArena {
    fn default() -> Self {
        Self::new()
    }
}

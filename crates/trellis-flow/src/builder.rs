//! Graph construction
//!
//! Walks the operation tree once, appending steps to the current block and
//! opening/closing regions as scaffolds nest. Declaration-form resources
//! scope over the remaining statements of their block, so statement-list
//! lowering recurses into the rest of the list when it meets one. A finish
//! pass resolves label targets, derives edge annotations from the region
//! chains of the endpoints, fills predecessors, and computes reachability.

use std::collections::HashMap;

use trellis_diagnostics::Diagnostics;
use trellis_ops::decl;
use trellis_ops::{
    BlockBody, Const, Declarator, Expr, Resource, ResourceBinding, Statement,
};
use trellis_types::{CaptureId, ConversionKind, Type};

use crate::error::FlowError;
use crate::goto;
use crate::graph::{
    BasicBlock, BlockId, BlockKind, Branch, BranchKind, Conditional, ControlFlowGraph, Step,
    ENTRY, EXIT,
};
use crate::regions::{RegionArena, RegionId, RegionKind};

pub(crate) struct GraphBuilder<'a> {
    pub(crate) body: &'a BlockBody,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) regions: RegionArena,
    region_stack: Vec<RegionId>,
    cur: BlockId,
    next_capture: CaptureId,
    labels: HashMap<String, BlockId>,
    pending: Vec<(BlockId, String)>,
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn run(
        body: &'a BlockBody,
        diags: &mut Diagnostics,
    ) -> Result<ControlFlowGraph, FlowError> {
        goto::check(&body.block, diags);

        let mut regions = RegionArena::new();
        regions.get_mut(RegionArena::ROOT).blocks.push(ENTRY);
        regions.get_mut(RegionArena::ROOT).blocks.push(EXIT);

        let mut builder = GraphBuilder {
            body,
            blocks: vec![
                BasicBlock::new(ENTRY, BlockKind::Entry, RegionArena::ROOT),
                BasicBlock::new(EXIT, BlockKind::Exit, RegionArena::ROOT),
            ],
            regions,
            region_stack: vec![RegionArena::ROOT],
            cur: ENTRY,
            next_capture: 0,
            labels: HashMap::new(),
            pending: Vec::new(),
        };

        let scoped = !body.locals.is_empty();
        if scoped {
            builder.open_region(RegionKind::Locals {
                locals: body.locals.iter().map(|l| l.id).collect(),
                captures: Vec::new(),
            });
        }
        let first = builder.new_block();
        builder.blocks[ENTRY].next = Some(Branch::to(first));
        builder.cur = first;

        builder.lower_statements(&body.block.statements)?;
        let last = builder.cur;
        if builder.blocks[last].next.is_none() {
            builder.blocks[last].next = Some(Branch::to(EXIT));
        }
        if scoped {
            builder.close_region();
        }

        builder.finish()
    }

    fn current_region(&self) -> RegionId {
        self.region_stack.last().copied().unwrap_or(RegionArena::ROOT)
    }

    fn open_region(&mut self, kind: RegionKind) -> RegionId {
        let region = self.regions.alloc(kind, self.current_region());
        self.region_stack.push(region);
        region
    }

    fn close_region(&mut self) {
        self.region_stack.pop();
    }

    /// New block in the current region, not connected to anything.
    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        let region = self.current_region();
        self.blocks.push(BasicBlock::new(id, BlockKind::Block, region));
        self.regions.get_mut(region).blocks.push(id);
        id
    }

    /// New block that the current block falls through into.
    fn start_block(&mut self) -> BlockId {
        let id = self.new_block();
        let cur = self.cur;
        if self.blocks[cur].next.is_none() {
            self.blocks[cur].next = Some(Branch::to(id));
        }
        self.cur = id;
        id
    }

    fn link(&mut self, from: BlockId, to: BlockId) {
        if self.blocks[from].next.is_none() {
            self.blocks[from].next = Some(Branch::to(to));
        }
    }

    fn push_step(&mut self, step: Step) {
        let cur = self.cur;
        self.blocks[cur].steps.push(step);
    }

    fn alloc_capture(&mut self, region: RegionId) -> CaptureId {
        let id = self.next_capture;
        self.next_capture += 1;
        if let RegionKind::Locals { captures, .. } = &mut self.regions.get_mut(region).kind {
            captures.push(id);
        }
        id
    }

    // --- statement lowering ---------------------------------------------

    fn lower_statements(&mut self, stmts: &[Statement]) -> Result<(), FlowError> {
        for (i, stmt) in stmts.iter().enumerate() {
            if let Statement::Declaration(group) = stmt {
                if group.is_resource {
                    // The rest of the block is this resource's scope.
                    let units: Vec<&Declarator> = group.declarators().collect();
                    let rest = &stmts[i + 1..];
                    let mut k = |b: &mut Self| b.lower_statements(rest);
                    self.lower_units(&units, &mut k)?;
                    self.step_out();
                    return Ok(());
                }
            }
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, stmt: &Statement) -> Result<(), FlowError> {
        match stmt {
            Statement::Expression(e) => {
                self.push_step(Step::Eval(e.clone()));
            }
            Statement::Declaration(group) => {
                if group.is_resource {
                    // Resource declaration in an embedded position: already
                    // diagnosed structurally, its scope is just itself.
                    let units: Vec<&Declarator> = group.declarators().collect();
                    let mut k = |_: &mut Self| Ok(());
                    self.lower_units(&units, &mut k)?;
                    self.step_out();
                } else {
                    for d in group.declarators() {
                        if let Some(init) = &d.initializer {
                            self.push_step(Step::Assign {
                                target: d.local,
                                value: init.clone(),
                            });
                        }
                    }
                }
            }
            Statement::Resource(scope) => match &scope.resource {
                Resource::Declaration(group) => {
                    let units: Vec<&Declarator> = group.declarators().collect();
                    let body = &*scope.body;
                    let mut k = |b: &mut Self| b.lower_statement(body);
                    self.lower_units(&units, &mut k)?;
                    self.step_out();
                }
                Resource::Expression { expr, binding } => {
                    let binding = binding.as_ref().ok_or(FlowError::UnclassifiedResource)?;
                    self.lower_expression_resource(expr, binding, &scope.body)?;
                }
            },
            Statement::Labeled { label, body, .. } => {
                let target = self.start_block();
                self.labels.insert(label.clone(), target);
                self.lower_statement(body)?;
            }
            Statement::Goto { label, .. } => {
                let src = self.cur;
                if self.blocks[src].next.is_none() {
                    self.blocks[src].next = Some(Branch::pending());
                    self.pending.push((src, label.clone()));
                }
                let cont = self.new_block();
                self.cur = cont;
            }
            Statement::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let test = self.cur;
                let then_start = self.new_block();
                self.link(test, then_start);
                self.cur = then_start;
                self.lower_statement(then_body)?;
                let then_end = self.cur;

                if let Some(else_body) = else_body {
                    let else_start = self.new_block();
                    self.blocks[test].conditional = Some(Conditional {
                        condition: condition.clone(),
                        jump_if: false,
                        branch: Branch::to(else_start),
                    });
                    self.cur = else_start;
                    self.lower_statement(else_body)?;
                    let else_end = self.cur;
                    let merge = self.new_block();
                    self.link(then_end, merge);
                    self.link(else_end, merge);
                    self.cur = merge;
                } else {
                    let merge = self.new_block();
                    self.blocks[test].conditional = Some(Conditional {
                        condition: condition.clone(),
                        jump_if: false,
                        branch: Branch::to(merge),
                    });
                    self.link(then_end, merge);
                    self.cur = merge;
                }
            }
            Statement::While {
                condition, body, ..
            } => {
                let header = self.start_block();
                let body_start = self.new_block();
                self.link(header, body_start);
                self.cur = body_start;
                self.lower_statement(body)?;
                let body_end = self.cur;
                self.link(body_end, header);
                let after = self.new_block();
                self.blocks[header].conditional = Some(Conditional {
                    condition: condition.clone(),
                    jump_if: false,
                    branch: Branch::to(after),
                });
                self.cur = after;
            }
            Statement::Block(inner) => {
                self.lower_statements(&inner.statements)?;
            }
            Statement::Return { .. } => {
                let src = self.cur;
                if self.blocks[src].next.is_none() {
                    self.blocks[src].next = Some(Branch::to(EXIT));
                }
                let cont = self.new_block();
                self.cur = cont;
            }
        }
        Ok(())
    }

    // --- resource scaffolding -------------------------------------------

    /// Lower a chain of resource declarators. Each disposable unit wraps
    /// the remaining units and the continuation `k` in its own scaffold, so
    /// disposal runs last-in-first-out.
    fn lower_units(
        &mut self,
        units: &[&Declarator],
        k: &mut dyn FnMut(&mut Self) -> Result<(), FlowError>,
    ) -> Result<(), FlowError> {
        let Some((d, tail)) = units.split_first() else {
            return k(self);
        };
        if let Some(init) = &d.initializer {
            self.push_step(Step::Assign {
                target: d.local,
                value: init.clone(),
            });
        }
        if !decl::is_disposable_unit(d) {
            return self.lower_units(tail, k);
        }
        let binding = d.binding.clone().ok_or(FlowError::UnclassifiedResource)?;
        let ty = self
            .body
            .local(d.local)
            .map(|l| l.ty.clone())
            .unwrap_or(Type::Error);
        let receiver = Expr::local(d.local, ty, d.span);
        let mut inner = |b: &mut Self| b.lower_units(tail, k);
        self.with_scaffold(receiver, &binding, 0, &mut inner)
    }

    /// Emit one try/finally scaffold: the continuation runs in the `Try`,
    /// the cleanup for `receiver` in the `Finally`. `close_after` extra
    /// regions (capture scopes) are closed before the after-block starts.
    fn with_scaffold(
        &mut self,
        receiver: Expr,
        binding: &ResourceBinding,
        close_after: usize,
        k: &mut dyn FnMut(&mut Self) -> Result<(), FlowError>,
    ) -> Result<(), FlowError> {
        self.open_region(RegionKind::TryAndFinally);
        self.open_region(RegionKind::Try);
        self.start_block();
        k(self)?;
        let body_end = self.cur;
        self.close_region();

        self.open_region(RegionKind::Finally);
        self.emit_cleanup(receiver, binding)?;
        self.close_region();
        self.close_region();
        for _ in 0..close_after {
            self.close_region();
        }

        // Leave the cursor at the protected body's last block: nested
        // scaffolds exit through one edge that finalizes every left region,
        // so only the outermost caller steps out.
        self.cur = body_end;
        Ok(())
    }

    /// Close a resource chain: move from the innermost protected block to a
    /// fresh block outside every scaffold. The connecting edge carries the
    /// full last-in-first-out finalizing list.
    fn step_out(&mut self) {
        let end = self.cur;
        let after = self.new_block();
        self.link(end, after);
        self.cur = after;
    }

    fn lower_expression_resource(
        &mut self,
        expr: &Expr,
        binding: &ResourceBinding,
        body: &Statement,
    ) -> Result<(), FlowError> {
        if !binding.is_disposable() {
            // Degraded: the resource is still evaluated, the body still
            // lowered, no scaffold.
            self.push_step(Step::Eval(expr.clone()));
            return self.lower_statement(body);
        }

        if binding.is_constant_null {
            // No capture; the converted literal itself is the receiver,
            // which keeps the guard condition statically decidable.
            let receiver = Expr::Conversion {
                kind: binding.conversion.kind,
                operand: Box::new(expr.clone()),
                ty: binding.disposal_ty.clone(),
                span: expr.span(),
            };
            let mut k = |b: &mut Self| b.lower_statement(body);
            self.with_scaffold(receiver, binding, 0, &mut k)?;
            self.step_out();
            return Ok(());
        }

        // An extra outermost capture for `dynamic`: the runtime-checked
        // conversion happens exactly once, visible to body and cleanup.
        let converted_region = if expr.ty().is_dynamic() {
            Some(self.open_region(RegionKind::Locals {
                locals: Vec::new(),
                captures: Vec::new(),
            }))
        } else {
            None
        };

        let value = self.spill(expr);
        let receiver = if let Some(region) = converted_region {
            let id = self.alloc_capture(region);
            self.push_step(Step::Capture {
                id,
                value: Expr::Conversion {
                    kind: ConversionKind::ExplicitDynamic,
                    operand: Box::new(value),
                    ty: binding.disposal_ty.clone(),
                    span: expr.span(),
                },
            });
            // The raw value's scope ends here; only the converted capture
            // outlives the conversion.
            self.close_region();
            Expr::CaptureRef {
                id,
                ty: binding.disposal_ty.clone(),
                span: expr.span(),
            }
        } else {
            value
        };

        let mut k = |b: &mut Self| b.lower_statement(body);
        self.with_scaffold(receiver, binding, 1, &mut k)?;
        self.step_out();
        Ok(())
    }

    /// Spill a resource expression into a flow capture, splitting
    /// multi-branch expressions so each path evaluates exactly once.
    /// Leaves the result capture's region open; the caller closes it when
    /// the last observer is done.
    fn spill(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::NullCoalesce {
                value,
                fallback,
                ty,
                span,
            } => {
                let result_region = self.open_region(RegionKind::Locals {
                    locals: Vec::new(),
                    captures: Vec::new(),
                });
                let operand_region = self.open_region(RegionKind::Locals {
                    locals: Vec::new(),
                    captures: Vec::new(),
                });
                let operand = self.alloc_capture(operand_region);
                self.start_block();
                self.push_step(Step::Capture {
                    id: operand,
                    value: (**value).clone(),
                });
                let test = self.cur;

                let result = self.alloc_capture(result_region);
                let direct = self.new_block();
                self.link(test, direct);
                self.cur = direct;
                self.push_step(Step::Capture {
                    id: result,
                    value: Expr::CaptureRef {
                        id: operand,
                        ty: value.ty(),
                        span: *span,
                    },
                });
                let direct_end = self.cur;

                let alt = self.new_block();
                self.blocks[test].conditional = Some(Conditional {
                    condition: Expr::IsNull {
                        operand: Box::new(Expr::CaptureRef {
                            id: operand,
                            ty: value.ty(),
                            span: *span,
                        }),
                        span: *span,
                    },
                    jump_if: true,
                    branch: Branch::to(alt),
                });
                self.cur = alt;
                self.push_step(Step::Capture {
                    id: result,
                    value: (**fallback).clone(),
                });
                let alt_end = self.cur;

                // The operand capture's scope closes at the merge point.
                self.close_region();
                let merge = self.new_block();
                self.link(direct_end, merge);
                self.link(alt_end, merge);
                self.cur = merge;

                Expr::CaptureRef {
                    id: result,
                    ty: ty.clone(),
                    span: *span,
                }
            }
            Expr::Conditional {
                condition,
                when_true,
                when_false,
                ty,
                span,
            } => {
                let region = self.open_region(RegionKind::Locals {
                    locals: Vec::new(),
                    captures: Vec::new(),
                });
                self.start_block();
                let result = self.alloc_capture(region);
                let test = self.cur;

                let when_true_block = self.new_block();
                self.link(test, when_true_block);
                self.cur = when_true_block;
                self.push_step(Step::Capture {
                    id: result,
                    value: (**when_true).clone(),
                });
                let true_end = self.cur;

                let when_false_block = self.new_block();
                self.blocks[test].conditional = Some(Conditional {
                    condition: (**condition).clone(),
                    jump_if: false,
                    branch: Branch::to(when_false_block),
                });
                self.cur = when_false_block;
                self.push_step(Step::Capture {
                    id: result,
                    value: (**when_false).clone(),
                });
                let false_end = self.cur;

                let merge = self.new_block();
                self.link(true_end, merge);
                self.link(false_end, merge);
                self.cur = merge;

                Expr::CaptureRef {
                    id: result,
                    ty: ty.clone(),
                    span: *span,
                }
            }
            other => {
                let region = self.open_region(RegionKind::Locals {
                    locals: Vec::new(),
                    captures: Vec::new(),
                });
                self.start_block();
                let id = self.alloc_capture(region);
                self.push_step(Step::Capture {
                    id,
                    value: other.clone(),
                });
                Expr::CaptureRef {
                    id,
                    ty: other.ty(),
                    span: other.span(),
                }
            }
        }
    }

    // --- finish pass -----------------------------------------------------

    fn finish(mut self) -> Result<ControlFlowGraph, FlowError> {
        if self.region_stack.len() != 1 {
            return Err(FlowError::UnbalancedRegions {
                open: self.region_stack.len() - 1,
            });
        }

        // Unresolved labels were already diagnosed; their edges fall
        // through to the exit.
        for (block, label) in std::mem::take(&mut self.pending) {
            let target = self.labels.get(&label).copied().unwrap_or(EXIT);
            if let Some(branch) = self.blocks[block].next.as_mut() {
                branch.target = Some(target);
            }
        }

        self.annotate_edges();
        self.compute_predecessors();
        self.compute_reachability();

        Ok(ControlFlowGraph {
            blocks: self.blocks,
            regions: self.regions,
        })
    }

    fn annotate_edges(&mut self) {
        for i in 0..self.blocks.len() {
            let src_region = self.blocks[i].region;
            for slot in 0..2 {
                let branch = match slot {
                    0 => self.blocks[i].next.as_ref(),
                    _ => self.blocks[i].conditional.as_ref().map(|c| &c.branch),
                };
                let Some(branch) = branch else { continue };
                if branch.kind != BranchKind::Regular {
                    continue;
                }
                let Some(target) = branch.target else { continue };

                let dst_region = self.blocks[target].region;
                let (leaving, entering) = self.regions.edge_transition(src_region, dst_region);
                // Each left try runs its paired finally; the innermost-first
                // leaving order is exactly last-in-first-out disposal.
                let finalizing: Vec<RegionId> = leaving
                    .iter()
                    .filter_map(|&r| self.regions.paired_finally(r))
                    .collect();

                let branch = match slot {
                    0 => self.blocks[i].next.as_mut(),
                    _ => self.blocks[i].conditional.as_mut().map(|c| &mut c.branch),
                };
                if let Some(branch) = branch {
                    branch.leaving = leaving;
                    branch.entering = entering;
                    branch.finalizing = finalizing;
                }
            }
        }
    }

    fn compute_predecessors(&mut self) {
        let mut edges = Vec::new();
        for block in &self.blocks {
            if let Some(target) = block.next.as_ref().and_then(regular_target) {
                edges.push((target, block.id));
            }
            if let Some(target) = block
                .conditional
                .as_ref()
                .and_then(|c| regular_target(&c.branch))
            {
                edges.push((target, block.id));
            }
        }
        for (target, source) in edges {
            self.blocks[target].predecessors.push(source);
        }
    }

    fn compute_reachability(&mut self) {
        let mut queue = vec![ENTRY];
        self.mark_reachable(&mut queue);

        // A finally runs whenever its try is entered, so its blocks become
        // reachable as soon as any try block is. Iterate until stable since
        // finallys can unlock each other.
        loop {
            let mut changed = false;
            for region in 0..self.regions.len() {
                if self.regions.get(region).kind != RegionKind::Finally {
                    continue;
                }
                let Some(parent) = self.regions.get(region).parent else {
                    continue;
                };
                let Some(try_region) = self
                    .regions
                    .get(parent)
                    .children
                    .iter()
                    .copied()
                    .find(|&c| self.regions.get(c).kind == RegionKind::Try)
                else {
                    continue;
                };
                let try_reachable = self
                    .regions
                    .blocks_in_subtree(try_region)
                    .iter()
                    .any(|&b| self.blocks[b].is_reachable);
                if !try_reachable {
                    continue;
                }
                let Some(&first) = self.regions.get(region).blocks.first() else {
                    continue;
                };
                if !self.blocks[first].is_reachable {
                    let mut queue = vec![first];
                    self.mark_reachable(&mut queue);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn mark_reachable(&mut self, queue: &mut Vec<BlockId>) {
        while let Some(id) = queue.pop() {
            if self.blocks[id].is_reachable {
                continue;
            }
            self.blocks[id].is_reachable = true;

            let block = &self.blocks[id];
            let fall_through = block.next.as_ref().and_then(regular_target);
            match &block.conditional {
                Some(cond) => {
                    let jump = regular_target(&cond.branch);
                    match const_eval(&cond.condition) {
                        Some(v) if v == cond.jump_if => queue.extend(jump),
                        Some(_) => queue.extend(fall_through),
                        None => {
                            queue.extend(jump);
                            queue.extend(fall_through);
                        }
                    }
                }
                None => queue.extend(fall_through),
            }
        }
    }
}

fn regular_target(branch: &Branch) -> Option<BlockId> {
    if branch.kind == BranchKind::Regular {
        branch.target
    } else {
        None
    }
}

/// Statically evaluate a branch condition, if its value is provable.
fn const_eval(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::IsNull { operand, .. } => match operand.constant() {
            Some(Const::Null) => Some(true),
            Some(_) => Some(false),
            None => None,
        },
        _ => match expr.constant() {
            Some(Const::Bool(b)) => Some(*b),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_diagnostics::{DiagnosticCode, Span};
    use trellis_ops::testing::TestModel;
    use trellis_ops::{
        lower_block, Block, Declaration, DeclarationGroup, ResourceScope,
    };
    use trellis_types::LocalId;

    fn build(body: BlockBody, model: &TestModel) -> (ControlFlowGraph, Diagnostics) {
        let mut diags = Diagnostics::new();
        let lowered = lower_block(body, model, &mut diags).unwrap();
        let cfg = ControlFlowGraph::build(&lowered, &mut diags).unwrap();
        (cfg, diags)
    }

    fn resource_group(body: &mut BlockBody, ty: &Type, names: &[&str]) -> DeclarationGroup {
        let mut declarators = Vec::new();
        for name in names {
            let local = body.add_local(*name, ty.clone(), Span::DUMMY);
            declarators.push(Declarator::new(
                local,
                Some(Expr::New {
                    ty: ty.clone(),
                    span: Span::DUMMY,
                }),
                Span::DUMMY,
            ));
        }
        DeclarationGroup {
            declarations: vec![Declaration {
                declared_ty: ty.clone(),
                is_const: false,
                declarators,
                span: Span::DUMMY,
            }],
            is_resource: true,
            is_await: false,
            span: Span::DUMMY,
        }
    }

    fn strip_conversions(e: &Expr) -> &Expr {
        match e {
            Expr::Conversion { operand, .. } => strip_conversions(operand),
            other => other,
        }
    }

    fn dispose_receiver(e: &Expr) -> Option<&Expr> {
        match e {
            Expr::DisposeCall { receiver, .. } => Some(strip_conversions(receiver)),
            Expr::Await { operand, .. } => dispose_receiver(operand),
            _ => None,
        }
    }

    fn disposed_local(cfg: &ControlFlowGraph, finally: RegionId) -> Option<LocalId> {
        for &b in &cfg.regions.get(finally).blocks {
            for step in &cfg.blocks[b].steps {
                if let Step::Eval(e) = step {
                    if let Some(Expr::LocalRef { local, .. }) = dispose_receiver(e) {
                        return Some(*local);
                    }
                }
            }
        }
        None
    }

    fn finally_regions(cfg: &ControlFlowGraph) -> Vec<RegionId> {
        cfg.regions
            .iter()
            .filter(|r| r.kind == RegionKind::Finally)
            .map(|r| r.id)
            .collect()
    }

    fn join_of(cfg: &ControlFlowGraph, finally: RegionId) -> BlockId {
        *cfg.regions
            .get(finally)
            .blocks
            .iter()
            .find(|&&b| {
                matches!(
                    cfg.blocks[b].next,
                    Some(Branch {
                        kind: BranchKind::StructuredExceptionHandling,
                        ..
                    })
                )
            })
            .unwrap()
    }

    #[test]
    fn expression_resource_evaluates_once() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::New {
                    ty,
                    span: Span::DUMMY,
                },
                binding: None,
            },
            body: Box::new(Statement::Block(Block::default())),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        let allocations: usize = cfg
            .blocks
            .iter()
            .flat_map(|b| b.steps.iter())
            .filter(|s| {
                let value = match s {
                    Step::Capture { value, .. } | Step::Assign { value, .. } => value,
                    Step::Eval(value) => value,
                };
                matches!(value, Expr::New { .. })
            })
            .count();
        assert_eq!(allocations, 1);
    }

    #[test]
    fn group_scaffolds_nest_in_declaration_order() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a", "b"]);
        body.block.statements.push(Statement::Declaration(group));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        let tafs: Vec<RegionId> = cfg
            .regions
            .iter()
            .filter(|r| r.kind == RegionKind::TryAndFinally)
            .map(|r| r.id)
            .collect();
        assert_eq!(tafs.len(), 2);
        let try_a = *cfg
            .regions
            .get(tafs[0])
            .children
            .iter()
            .find(|&&c| cfg.regions.get(c).kind == RegionKind::Try)
            .unwrap();
        // b's whole scaffold sits inside a's protected body
        assert_eq!(cfg.regions.get(tafs[1]).parent, Some(try_a));
    }

    #[test]
    fn group_disposal_is_last_in_first_out() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a", "b"]);
        body.block.statements.push(Statement::Declaration(group));

        let (cfg, _) = build(body, &model);

        let exit_edge = cfg
            .blocks
            .iter()
            .filter_map(|b| b.next.as_ref())
            .find(|br| br.finalizing.len() == 2)
            .expect("edge leaving both scaffolds");
        assert_eq!(disposed_local(&cfg, exit_edge.finalizing[0]), Some(1));
        assert_eq!(disposed_local(&cfg, exit_edge.finalizing[1]), Some(0));
    }

    #[test]
    fn reference_resource_cleanup_is_null_guarded() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a"]);
        body.block.statements.push(Statement::Declaration(group));

        let (cfg, _) = build(body, &model);

        let finallys = finally_regions(&cfg);
        assert_eq!(finallys.len(), 1);
        let blocks = &cfg.regions.get(finallys[0]).blocks;
        assert_eq!(blocks.len(), 3);

        let guard = &cfg.blocks[blocks[0]];
        let cond = guard.conditional.as_ref().expect("null guard");
        assert!(matches!(cond.condition, Expr::IsNull { .. }));
        assert!(cond.jump_if);
        assert_eq!(cond.branch.target, Some(join_of(&cfg, finallys[0])));
        // finally blocks are entered implicitly
        assert!(guard.predecessors.is_empty());
    }

    #[test]
    fn value_struct_cleanup_has_no_guard() {
        let model = TestModel::new();
        let ty = model.disposable_struct("Cursor");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["c"]);
        body.block.statements.push(Statement::Declaration(group));

        let (cfg, _) = build(body, &model);

        let finallys = finally_regions(&cfg);
        let blocks = &cfg.regions.get(finallys[0]).blocks;
        assert_eq!(blocks.len(), 2);
        let dispose = &cfg.blocks[blocks[0]];
        assert!(dispose.conditional.is_none());
        assert!(dispose
            .steps
            .iter()
            .any(|s| matches!(s, Step::Eval(e) if dispose_receiver(e).is_some())));
    }

    #[test]
    fn async_cleanup_awaits_between_guard_and_join() {
        let model = TestModel::new();
        let ty = model.async_disposable_class("Connection");
        let mut body = BlockBody::new();
        let local = body.add_local("c", ty.clone(), Span::DUMMY);
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Declaration(DeclarationGroup {
                declarations: vec![Declaration {
                    declared_ty: ty.clone(),
                    is_const: false,
                    declarators: vec![Declarator::new(
                        local,
                        Some(Expr::New {
                            ty,
                            span: Span::DUMMY,
                        }),
                        Span::DUMMY,
                    )],
                    span: Span::DUMMY,
                }],
                is_resource: true,
                is_await: false,
                span: Span::DUMMY,
            }),
            body: Box::new(Statement::Block(Block::default())),
            is_await: true,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        let finallys = finally_regions(&cfg);
        assert_eq!(finallys.len(), 1);
        let blocks = &cfg.regions.get(finallys[0]).blocks;
        assert_eq!(blocks.len(), 3);

        let awaits: usize = blocks
            .iter()
            .flat_map(|&b| cfg.blocks[b].steps.iter())
            .filter(|s| matches!(s, Step::Eval(Expr::Await { .. })))
            .count();
        assert_eq!(awaits, 1);
        // the await sits in the dispose block, after the guard and before
        // the join
        assert!(cfg.blocks[blocks[1]]
            .steps
            .iter()
            .any(|s| matches!(s, Step::Eval(Expr::Await { .. }))));
    }

    #[test]
    fn mixed_sync_and_async_cleanups_stay_separate() {
        let model = TestModel::new();
        let sync_ty = model.disposable_class("File");
        let dual_ty = model.dual_disposable_class("Channel");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &sync_ty, &["f"]);
        body.block.statements.push(Statement::Declaration(group));
        let channel = body.add_local("ch", dual_ty.clone(), Span::DUMMY);
        body.block.statements.push(Statement::Declaration(DeclarationGroup {
            declarations: vec![Declaration {
                declared_ty: dual_ty.clone(),
                is_const: false,
                declarators: vec![Declarator::new(
                    channel,
                    Some(Expr::New {
                        ty: dual_ty,
                        span: Span::DUMMY,
                    }),
                    Span::DUMMY,
                )],
                span: Span::DUMMY,
            }],
            is_resource: true,
            is_await: true,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        // two independent finally regions; the awaited scope is the inner
        // one, so its region closes first
        let finallys = finally_regions(&cfg);
        assert_eq!(finallys.len(), 2);
        assert_eq!(disposed_local(&cfg, finallys[0]), Some(channel));
        assert_eq!(disposed_local(&cfg, finallys[1]), Some(0));

        let awaits: Vec<usize> = finallys
            .iter()
            .map(|&f| {
                cfg.regions
                    .get(f)
                    .blocks
                    .iter()
                    .flat_map(|&b| cfg.blocks[b].steps.iter())
                    .filter(|s| matches!(s, Step::Eval(Expr::Await { .. })))
                    .count()
            })
            .collect();
        assert_eq!(awaits, vec![1, 0]);

        // both scopes are guarded reference cleanups of three blocks each
        for &f in &finallys {
            assert_eq!(cfg.regions.get(f).blocks.len(), 3);
        }

        // each scope exits through its own edge; the two cleanups never
        // share one
        let finalizers: Vec<&Branch> = cfg
            .blocks
            .iter()
            .filter_map(|b| b.next.as_ref())
            .filter(|br| !br.finalizing.is_empty())
            .collect();
        assert_eq!(finalizers.len(), 2);
        assert!(finalizers.iter().all(|br| br.finalizing.len() == 1));
    }

    #[test]
    fn constant_null_resource_has_dead_dispose_block() {
        let model = TestModel::new();
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::null(Span::DUMMY),
                binding: None,
            },
            body: Box::new(Statement::Block(Block::default())),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        let finallys = finally_regions(&cfg);
        let blocks = &cfg.regions.get(finallys[0]).blocks;
        let [guard, dispose, join] = blocks[..] else {
            panic!("expected guard, dispose, join");
        };
        assert!(cfg.blocks[guard].is_reachable);
        assert!(!cfg.blocks[dispose].is_reachable);
        assert!(cfg.blocks[join].is_reachable);
    }

    #[test]
    fn null_coalescing_resource_merges_into_one_capture() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::NullCoalesce {
                    value: Box::new(Expr::ParamRef {
                        name: "primary".into(),
                        ty: ty.clone(),
                        span: Span::DUMMY,
                    }),
                    fallback: Box::new(Expr::ParamRef {
                        name: "backup".into(),
                        ty: ty.clone(),
                        span: Span::DUMMY,
                    }),
                    ty,
                    span: Span::DUMMY,
                },
                binding: None,
            },
            body: Box::new(Statement::Block(Block::default())),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        // operand capture 0, result capture 1
        let result_writes: Vec<&BasicBlock> = cfg
            .blocks
            .iter()
            .filter(|b| {
                b.steps
                    .iter()
                    .any(|s| matches!(s, Step::Capture { id: 1, .. }))
            })
            .collect();
        assert_eq!(result_writes.len(), 2);

        let test = cfg
            .blocks
            .iter()
            .find(|b| b.conditional.is_some())
            .expect("null test on the operand");
        let cond = test.conditional.as_ref().unwrap();
        assert!(matches!(
            &cond.condition,
            Expr::IsNull { operand, .. }
                if matches!(**operand, Expr::CaptureRef { id: 0, .. })
        ));

        // each operand evaluates on exactly one path
        let primaries: usize = cfg
            .blocks
            .iter()
            .flat_map(|b| b.steps.iter())
            .filter(|s| {
                matches!(s, Step::Capture { value: Expr::ParamRef { name, .. }, .. } if name == "primary")
            })
            .count();
        assert_eq!(primaries, 1);

        // cleanup reads the merged result
        let finallys = finally_regions(&cfg);
        let receiver = cfg
            .regions
            .get(finallys[0])
            .blocks
            .iter()
            .flat_map(|&b| cfg.blocks[b].steps.iter())
            .find_map(|s| match s {
                Step::Eval(e) => dispose_receiver(e),
                _ => None,
            })
            .expect("dispose call");
        assert!(matches!(receiver, Expr::CaptureRef { id: 1, .. }));
    }

    #[test]
    fn conditional_resource_merges_into_one_capture() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::Conditional {
                    condition: Box::new(Expr::ParamRef {
                        name: "fresh".into(),
                        ty: Type::Bool,
                        span: Span::DUMMY,
                    }),
                    when_true: Box::new(Expr::New {
                        ty: ty.clone(),
                        span: Span::DUMMY,
                    }),
                    when_false: Box::new(Expr::ParamRef {
                        name: "pooled".into(),
                        ty: ty.clone(),
                        span: Span::DUMMY,
                    }),
                    ty,
                    span: Span::DUMMY,
                },
                binding: None,
            },
            body: Box::new(Statement::Block(Block::default())),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        // both arms write the same slot
        let writes: usize = cfg
            .blocks
            .iter()
            .filter(|b| {
                b.steps
                    .iter()
                    .any(|s| matches!(s, Step::Capture { id: 0, .. }))
            })
            .count();
        assert_eq!(writes, 2);

        // the branch is on the condition itself, evaluated once
        let test = cfg
            .blocks
            .iter()
            .find(|b| b.conditional.is_some())
            .expect("test on the condition");
        let cond = test.conditional.as_ref().unwrap();
        assert!(
            matches!(&cond.condition, Expr::ParamRef { name, .. } if name == "fresh")
        );
        assert!(!cond.jump_if);

        // the selected arm allocates on exactly one path
        let allocations: usize = cfg
            .blocks
            .iter()
            .flat_map(|b| b.steps.iter())
            .filter(|s| {
                matches!(s, Step::Capture { value: Expr::New { .. }, .. })
            })
            .count();
        assert_eq!(allocations, 1);

        // cleanup disposes the merged capture
        let finallys = finally_regions(&cfg);
        let receiver = cfg
            .regions
            .get(finallys[0])
            .blocks
            .iter()
            .flat_map(|&b| cfg.blocks[b].steps.iter())
            .find_map(|s| match s {
                Step::Eval(e) => dispose_receiver(e),
                _ => None,
            })
            .expect("dispose call");
        assert!(matches!(receiver, Expr::CaptureRef { id: 0, .. }));
    }

    #[test]
    fn dynamic_resource_converts_into_an_outer_capture() {
        let model = TestModel::new();
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::ParamRef {
                    name: "d".into(),
                    ty: Type::Dynamic,
                    span: Span::DUMMY,
                },
                binding: None,
            },
            body: Box::new(Statement::Block(Block::default())),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        // capture 0 holds the raw value, capture 1 the converted one
        let conversions: Vec<&Expr> = cfg
            .blocks
            .iter()
            .flat_map(|b| b.steps.iter())
            .filter_map(|s| match s {
                Step::Capture { id: 1, value } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(conversions.len(), 1);
        assert!(matches!(
            conversions[0],
            Expr::Conversion {
                kind: ConversionKind::ExplicitDynamic,
                ..
            }
        ));

        // converted capture's region encloses the raw value's region
        let capture_region = |id: CaptureId| {
            cfg.regions
                .iter()
                .find(|r| matches!(&r.kind, RegionKind::Locals { captures, .. } if captures.contains(&id)))
                .map(|r| r.id)
                .unwrap()
        };
        assert_eq!(
            cfg.regions.get(capture_region(0)).parent,
            Some(capture_region(1))
        );

        // the dispose site uses the converted value directly
        let finallys = finally_regions(&cfg);
        let dispose = cfg
            .regions
            .get(finallys[0])
            .blocks
            .iter()
            .flat_map(|&b| cfg.blocks[b].steps.iter())
            .find_map(|s| match s {
                Step::Eval(Expr::DisposeCall { receiver, .. }) => Some(&**receiver),
                _ => None,
            })
            .expect("dispose call");
        assert!(matches!(dispose, Expr::CaptureRef { id: 1, .. }));
    }

    #[test]
    fn return_inside_scope_finalizes_on_the_exit_edge() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a"]);
        body.block.statements.push(Statement::Declaration(group));
        body.block
            .statements
            .push(Statement::Return { span: Span::DUMMY });

        let (cfg, _) = build(body, &model);

        let exit_edge = cfg
            .blocks
            .iter()
            .filter(|b| b.is_reachable)
            .filter_map(|b| b.next.as_ref())
            .find(|br| br.target == Some(crate::graph::EXIT) && !br.finalizing.is_empty())
            .expect("return edge through the finally");
        assert_eq!(exit_edge.finalizing.len(), 1);
    }

    #[test]
    fn loop_reenters_declaration_scope_cleanly() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a"]);
        body.block.statements.push(Statement::While {
            condition: Expr::ParamRef {
                name: "more".into(),
                ty: Type::Bool,
                span: Span::DUMMY,
            },
            body: Box::new(Statement::Block(Block::new(
                vec![Statement::Declaration(group)],
                Span::DUMMY,
            ))),
            span: Span::DUMMY,
        });

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());
        // the back edge leaves the scaffold and runs its finally
        let back_edge = cfg
            .blocks
            .iter()
            .filter_map(|b| b.next.as_ref())
            .find(|br| br.finalizing.len() == 1 && br.target.is_some());
        assert!(back_edge.is_some());
    }

    #[test]
    fn backward_jump_crossing_resource_keeps_its_edge() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let group = resource_group(&mut body, &ty, &["a"]);
        body.block.statements.push(Statement::Labeled {
            label: "top".into(),
            body: Box::new(Statement::Expression(Expr::ParamRef {
                name: "marker".into(),
                ty: Type::Void,
                span: Span::DUMMY,
            })),
            span: Span::DUMMY,
        });
        body.block.statements.push(Statement::Declaration(group));
        body.block.statements.push(Statement::Goto {
            label: "top".into(),
            span: Span::DUMMY,
        });

        let (cfg, diags) = build(body, &model);
        assert_eq!(
            diags
                .with_code(DiagnosticCode::BackwardJumpCrossesResource)
                .count(),
            1
        );

        // the offending edge is still in the graph, annotated like any
        // other scope exit
        let marker = cfg
            .blocks
            .iter()
            .find(|b| {
                b.steps.iter().any(|s| {
                    matches!(s, Step::Eval(Expr::ParamRef { name, .. }) if name == "marker")
                })
            })
            .expect("label block");
        let jump = cfg
            .blocks
            .iter()
            .filter_map(|b| b.next.as_ref())
            .find(|br| br.target == Some(marker.id) && !br.finalizing.is_empty());
        assert!(jump.is_some());
    }

    #[test]
    fn unresolved_label_falls_through_to_exit() {
        let model = TestModel::new();
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::Goto {
            label: "nowhere".into(),
            span: Span::DUMMY,
        });

        let (cfg, diags) = build(body, &model);
        assert_eq!(diags.with_code(DiagnosticCode::UndefinedLabel).count(), 1);
        let jump = cfg
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Block)
            .filter_map(|b| b.next.as_ref())
            .find(|br| br.target == Some(crate::graph::EXIT));
        assert!(jump.is_some());
    }

    #[test]
    fn block_and_declaration_forms_compose() {
        let model = TestModel::new();
        let ty = model.disposable_class("File");
        let mut body = BlockBody::new();
        let inner_group = resource_group(&mut body, &ty, &["b"]);
        body.block.statements.push(Statement::Resource(ResourceScope {
            resource: Resource::Expression {
                expr: Expr::New {
                    ty,
                    span: Span::DUMMY,
                },
                binding: None,
            },
            body: Box::new(Statement::Block(Block::new(
                vec![Statement::Declaration(inner_group)],
                Span::DUMMY,
            ))),
            is_await: false,
            span: Span::DUMMY,
        }));

        let (cfg, diags) = build(body, &model);
        assert!(diags.is_empty());

        let tafs: Vec<RegionId> = cfg
            .regions
            .iter()
            .filter(|r| r.kind == RegionKind::TryAndFinally)
            .map(|r| r.id)
            .collect();
        assert_eq!(tafs.len(), 2);
        // the declaration-form scaffold nests inside the block-form try
        let chain = cfg.regions.chain(tafs[1]);
        assert!(chain.contains(&tafs[0]));
    }

    #[test]
    fn if_statement_shapes_branches_and_merge() {
        let model = TestModel::new();
        let mut body = BlockBody::new();
        body.block.statements.push(Statement::If {
            condition: Expr::ParamRef {
                name: "flag".into(),
                ty: Type::Bool,
                span: Span::DUMMY,
            },
            then_body: Box::new(Statement::Expression(Expr::ParamRef {
                name: "t".into(),
                ty: Type::Void,
                span: Span::DUMMY,
            })),
            else_body: Some(Box::new(Statement::Expression(Expr::ParamRef {
                name: "f".into(),
                ty: Type::Void,
                span: Span::DUMMY,
            }))),
            span: Span::DUMMY,
        });

        let (cfg, _) = build(body, &model);
        let test = cfg
            .blocks
            .iter()
            .find(|b| b.conditional.is_some())
            .expect("branch block");
        assert!(!test.conditional.as_ref().unwrap().jump_if);
        let merge = cfg
            .blocks
            .iter()
            .find(|b| b.predecessors.len() == 2)
            .expect("merge block");
        assert!(merge.is_reachable);
    }
}

//! Cleanup synthesis
//!
//! Fills the finally region of a resource scaffold with up to three blocks:
//! a null guard that skips disposal when the resource was never produced,
//! the dispose block that converts the receiver and invokes the disposal
//! member (awaited for the asynchronous protocol), and a join block that
//! leaves the region through a structured-exception-handling edge. The
//! guard is omitted when the resource type can never hold null.

use trellis_ops::{Expr, ResourceBinding};

use crate::builder::GraphBuilder;
use crate::error::FlowError;
use crate::graph::{Branch, Conditional, Step};

impl GraphBuilder<'_> {
    /// Emit guard/dispose/join into the currently open finally region.
    /// Blocks are created detached; a finally has no regular predecessors.
    pub(crate) fn emit_cleanup(
        &mut self,
        receiver: Expr,
        binding: &ResourceBinding,
    ) -> Result<(), FlowError> {
        let member = binding
            .member
            .clone()
            .ok_or(FlowError::MissingDisposeMember)?;
        let span = receiver.span();

        let guard = binding.needs_null_guard.then(|| self.new_block());
        let dispose = self.new_block();
        if let Some(guard) = guard {
            if self.blocks[guard].next.is_none() {
                self.blocks[guard].next = Some(Branch::to(dispose));
            }
        }

        // Receivers already carrying the disposal-capable type (converted
        // dynamic captures, converted null literals) are used as-is; every
        // other binding applies its conversion at the dispose site.
        let converted = if binding.conversion.is_identity() || receiver.ty() == binding.disposal_ty
        {
            receiver.clone()
        } else {
            Expr::Conversion {
                kind: binding.conversion.kind,
                operand: Box::new(receiver.clone()),
                ty: binding.disposal_ty.clone(),
                span,
            }
        };
        let call = Expr::DisposeCall {
            member,
            receiver: Box::new(converted),
            span,
        };
        let call = if binding.is_async() {
            Expr::Await {
                operand: Box::new(call),
                span,
            }
        } else {
            call
        };
        self.blocks[dispose].steps.push(Step::Eval(call));

        let join = self.new_block();
        if self.blocks[dispose].next.is_none() {
            self.blocks[dispose].next = Some(Branch::to(join));
        }
        if let Some(guard) = guard {
            self.blocks[guard].conditional = Some(Conditional {
                condition: Expr::IsNull {
                    operand: Box::new(receiver),
                    span,
                },
                jump_if: true,
                branch: Branch::to(join),
            });
        }
        self.blocks[join].next = Some(Branch::structured_exception_handling());
        Ok(())
    }
}

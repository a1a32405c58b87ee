//! Tree-shaping pass
//!
//! `lower_block` takes a bound body and produces the operation tree:
//! declaration groups normalized to one declarator per declaration,
//! structural placement validated, and every resource classified with its
//! [`ResourceBinding`](crate::resource::ResourceBinding) attached in place.
//! Semantic problems degrade and are reported; only broken internal
//! invariants (a declarator naming a local the body never registered)
//! surface as a hard error.

use anyhow::{anyhow, Result};
use trellis_diagnostics::Diagnostics;
use trellis_types::SemanticModel;

use crate::decl;
use crate::ir::{Block, BlockBody, DeclarationGroup, Local, Resource, Statement};
use crate::resource::classify;
use crate::validate;

/// Lower `body` into its operation tree.
pub fn lower_block(
    body: BlockBody,
    model: &dyn SemanticModel,
    diags: &mut Diagnostics,
) -> Result<BlockBody> {
    let BlockBody { locals, mut block } = body;

    validate::check_block(&block, diags);

    let lowerer = Lowerer {
        locals: &locals,
        model,
    };
    lowerer.lower_into(&mut block, diags)?;

    Ok(BlockBody { locals, block })
}

struct Lowerer<'a> {
    locals: &'a [Local],
    model: &'a dyn SemanticModel,
}

impl<'a> Lowerer<'a> {
    fn lower_into(&self, block: &mut Block, diags: &mut Diagnostics) -> Result<()> {
        for statement in &mut block.statements {
            self.lower_statement(statement, diags)?;
        }
        Ok(())
    }

    fn lower_statement(&self, statement: &mut Statement, diags: &mut Diagnostics) -> Result<()> {
        match statement {
            Statement::Declaration(group) => {
                self.lower_group(group, diags)?;
            }
            Statement::Resource(scope) => {
                let is_await = scope.is_await;
                match &mut scope.resource {
                    Resource::Declaration(group) => {
                        // The scope's await marker governs the whole group.
                        group.is_resource = true;
                        group.is_await = is_await;
                        self.lower_group(group, diags)?;
                    }
                    Resource::Expression { expr, binding } => {
                        let classified = classify(
                            &expr.ty(),
                            expr.is_constant_null(),
                            is_await,
                            expr.span(),
                            self.model,
                            diags,
                        );
                        *binding = Some(classified.into_binding());
                    }
                }
                self.lower_statement(&mut scope.body, diags)?;
            }
            Statement::Labeled { body, .. } | Statement::While { body, .. } => {
                self.lower_statement(body, diags)?;
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                self.lower_statement(then_body, diags)?;
                if let Some(else_body) = else_body {
                    self.lower_statement(else_body, diags)?;
                }
            }
            Statement::Block(inner) => {
                self.lower_into(inner, diags)?;
            }
            Statement::Expression(_) | Statement::Goto { .. } | Statement::Return { .. } => {}
        }
        Ok(())
    }

    fn lower_group(&self, group: &mut DeclarationGroup, diags: &mut Diagnostics) -> Result<()> {
        let span = group.span;
        let taken = std::mem::replace(
            group,
            DeclarationGroup {
                declarations: Vec::new(),
                is_resource: false,
                is_await: false,
                span,
            },
        );
        *group = decl::normalize(taken);
        decl::check_initializers(group, diags);

        if !group.is_resource {
            return Ok(());
        }

        let is_await = group.is_await;
        for declarator in group.declarators_mut() {
            // Declarators without an initializer were already reported;
            // they carry no binding and synthesize no cleanup.
            if declarator.initializer.is_none() {
                continue;
            }
            let local = self
                .locals
                .get(declarator.local as usize)
                .ok_or_else(|| anyhow!("declarator references unregistered local {}", declarator.local))?;
            let constant_null = declarator
                .initializer
                .as_ref()
                .map(|e| e.is_constant_null())
                .unwrap_or(false);
            let classified = classify(
                &local.ty,
                constant_null,
                is_await,
                declarator.span,
                self.model,
                diags,
            );
            declarator.binding = Some(classified.into_binding());
        }
        Ok(())
    }
}

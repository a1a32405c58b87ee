//! Structural validation of statement placement
//!
//! A declaration may not stand alone as the embedded statement of a label,
//! `if`, or `while`; it must be wrapped in a block so its scope is
//! explicit. Block-form resource statements are real statements and are
//! exempt. Violations are diagnosed and the statement is lowered anyway.

use trellis_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Suggestion};

use crate::ir::{Block, Statement};

/// Walk `block` and report every declaration used as an embedded statement.
pub fn check_block(block: &Block, diags: &mut Diagnostics) {
    for statement in &block.statements {
        check_statement(statement, diags);
    }
}

fn check_statement(statement: &Statement, diags: &mut Diagnostics) {
    match statement {
        Statement::Labeled { body, .. } => {
            check_embedded(body, diags);
        }
        Statement::If {
            then_body,
            else_body,
            ..
        } => {
            check_embedded(then_body, diags);
            if let Some(else_body) = else_body {
                check_embedded(else_body, diags);
            }
        }
        Statement::While { body, .. } => {
            check_embedded(body, diags);
        }
        Statement::Resource(scope) => {
            check_embedded(&scope.body, diags);
        }
        Statement::Block(inner) => {
            check_block(inner, diags);
        }
        Statement::Expression(_)
        | Statement::Declaration(_)
        | Statement::Goto { .. }
        | Statement::Return { .. } => {}
    }
}

/// `statement` sits in an embedded position. Declarations are rejected
/// here; everything else recurses normally.
fn check_embedded(statement: &Statement, diags: &mut Diagnostics) {
    if let Statement::Declaration(group) = statement {
        let span = group.span;
        diags.push(
            Diagnostic::new(
                DiagnosticCode::EmbeddedDeclaration,
                "an embedded statement cannot be a declaration",
            )
            .with_span(span)
            .with_suggestion(Suggestion::replace(
                span,
                "{ ... }",
                "wrap the declaration in a block",
            ))
            .build(),
        );
        // Fall through so nested bodies are still checked.
    }
    check_statement(statement, diags);
}

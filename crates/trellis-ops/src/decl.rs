//! Declarator normalization
//!
//! Multi-declarator groups (`T a = e1, b = e2;`) flatten into one
//! declaration per name so every downstream pass sees a uniform
//! one-declarator shape. Initializers are carried through unevaluated and
//! keep their source order; for resource groups that order is what drives
//! the nesting of the cleanup scaffolds.

use trellis_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};

use crate::ir::{Declaration, DeclarationGroup, Declarator};

/// Flatten `group` so each [`Declaration`] holds exactly one declarator.
///
/// Declaration order is preserved; groups already in normal form pass
/// through unchanged.
pub fn normalize(group: DeclarationGroup) -> DeclarationGroup {
    if group.declarations.iter().all(|d| d.declarators.len() == 1) {
        return group;
    }

    let mut declarations = Vec::new();
    for decl in group.declarations {
        let Declaration {
            declared_ty,
            is_const,
            declarators,
            span,
        } = decl;
        for declarator in declarators {
            declarations.push(Declaration {
                declared_ty: declared_ty.clone(),
                is_const,
                declarators: vec![declarator],
                span,
            });
        }
    }

    DeclarationGroup {
        declarations,
        is_resource: group.is_resource,
        is_await: group.is_await,
        span: group.span,
    }
}

/// Report every resource declarator that lacks an initializer.
///
/// A resource local with nothing assigned has nothing to dispose; the
/// declarator is kept with its absent initializer so the tree stays
/// complete, and the cleanup synthesizer skips it.
pub fn check_initializers(group: &DeclarationGroup, diags: &mut Diagnostics) {
    if !group.is_resource {
        return;
    }
    for declarator in group.declarators() {
        if declarator.initializer.is_none() {
            diags.push(
                Diagnostic::new(
                    DiagnosticCode::InitializerRequired,
                    "a resource declaration requires an initializer",
                )
                .with_span(declarator.span)
                .build(),
            );
        }
    }
}

/// Whether this declarator participates in cleanup synthesis.
pub fn is_disposable_unit(declarator: &Declarator) -> bool {
    declarator.initializer.is_some()
        && declarator
            .binding
            .as_ref()
            .map(|b| b.is_disposable())
            .unwrap_or(false)
}

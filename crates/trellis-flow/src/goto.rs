//! Jump safety
//!
//! A lexical pass over the operation tree, run before graph construction.
//! Checks that every jump targets a defined label and that no backward
//! jump crosses a declaration-form resource that is still in scope at the
//! jump site. Violations are diagnosed only; the builder emits the edge
//! regardless.
//!
//! Positions are tracked as paths of `(scope, index)` pairs, one per
//! statement-list frame between the root block and the statement. Scope
//! ids are allocated in lexical order. A labeled statement is transparent:
//! its body shares the label's own position, so a declaration directly
//! under a label counts as sitting at the label.

use std::collections::HashMap;

use trellis_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Span};
use trellis_ops::{Block, Statement};

type Path = Vec<(usize, usize)>;

/// Validate every goto in `block`, pushing diagnostics into `diags`.
pub fn check(block: &Block, diags: &mut Diagnostics) {
    let mut pass = GotoPass::default();
    let mut path = Vec::new();
    pass.visit_block(block, &mut path);
    pass.report(diags);
}

#[derive(Default)]
struct GotoPass {
    next_scope: usize,
    labels: HashMap<String, Path>,
    gotos: Vec<(Path, String, Span)>,
    /// scope -> declaration-form resource statements in it, by index
    resources: HashMap<usize, Vec<(usize, Span)>>,
}

impl GotoPass {
    fn fresh_scope(&mut self) -> usize {
        let scope = self.next_scope;
        self.next_scope += 1;
        scope
    }

    fn visit_block(&mut self, block: &Block, path: &mut Path) {
        let scope = self.fresh_scope();
        for (index, stmt) in block.statements.iter().enumerate() {
            path.push((scope, index));
            self.visit_statement(stmt, path);
            path.pop();
        }
    }

    /// Embedded single-statement bodies get a one-entry frame of their own.
    fn visit_nested(&mut self, stmt: &Statement, path: &mut Path) {
        if let Statement::Block(block) = stmt {
            self.visit_block(block, path);
            return;
        }
        let scope = self.fresh_scope();
        path.push((scope, 0));
        self.visit_statement(stmt, path);
        path.pop();
    }

    fn visit_statement(&mut self, stmt: &Statement, path: &mut Path) {
        match stmt {
            Statement::Declaration(group) if group.is_resource => {
                if let Some(&(scope, index)) = path.last() {
                    self.resources
                        .entry(scope)
                        .or_default()
                        .push((index, group.span));
                }
            }
            Statement::Labeled { label, body, .. } => {
                self.labels.insert(label.clone(), path.clone());
                self.visit_statement(body, path);
            }
            Statement::Goto { label, span } => {
                self.gotos.push((path.clone(), label.clone(), *span));
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                self.visit_nested(then_body, path);
                if let Some(else_body) = else_body {
                    self.visit_nested(else_body, path);
                }
            }
            Statement::While { body, .. } => {
                self.visit_nested(body, path);
            }
            // Block-form resources end their scope with their body, so they
            // never constrain later jumps.
            Statement::Resource(scope) => {
                self.visit_nested(&scope.body, path);
            }
            Statement::Block(block) => {
                self.visit_block(block, path);
            }
            Statement::Expression(_) | Statement::Declaration(_) | Statement::Return { .. } => {}
        }
    }

    fn report(self, diags: &mut Diagnostics) {
        for (goto_path, label, span) in &self.gotos {
            let Some(label_path) = self.labels.get(label) else {
                diags.push(
                    Diagnostic::new(
                        DiagnosticCode::UndefinedLabel,
                        format!("no label named `{}` in this body", label),
                    )
                    .with_span(*span)
                    .build(),
                );
                continue;
            };
            if !is_backward(label_path, goto_path) {
                continue;
            }
            // A declaration between label and goto, in a scope the goto is
            // still inside of, is crossed backward by this jump.
            'frames: for &(scope, goto_index) in goto_path {
                let Some(decls) = self.resources.get(&scope) else {
                    continue;
                };
                let Some(label_index) = label_path
                    .iter()
                    .find(|&&(s, _)| s == scope)
                    .map(|&(_, i)| i)
                else {
                    continue;
                };
                for &(decl_index, decl_span) in decls {
                    if label_index <= decl_index && decl_index < goto_index {
                        diags.push(
                            Diagnostic::new(
                                DiagnosticCode::BackwardJumpCrossesResource,
                                "a jump cannot move backward across a resource declaration that is still in scope",
                            )
                            .with_span(*span)
                            .with_label(decl_span, "resource declared here")
                            .build(),
                        );
                        break 'frames;
                    }
                }
            }
        }
    }
}

/// Whether the label lexically precedes the goto. Paths are compared
/// frame by frame; an enclosing (shorter) path counts as earlier.
fn is_backward(label: &Path, goto: &Path) -> bool {
    for (&(label_scope, label_index), &(goto_scope, goto_index)) in label.iter().zip(goto.iter()) {
        if label_scope == goto_scope {
            if label_index != goto_index {
                return label_index < goto_index;
            }
        } else {
            // sibling frames under the same statement: scope ids follow
            // lexical order
            return label_scope < goto_scope;
        }
    }
    label.len() <= goto.len()
}

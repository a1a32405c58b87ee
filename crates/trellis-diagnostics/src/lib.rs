//! Diagnostic infrastructure for the Trellis semantic lowering layer.
//!
//! This crate provides structured error reporting with:
//! - Source location tracking (file id + byte offsets)
//! - Rich diagnostic types with error codes
//! - Suggestions for fixes and related-location labels
//!
//! Diagnostics produced during lowering are informational annotations on a
//! best-effort tree/graph: the lowering pipeline never aborts in response to
//! a semantic error, so the sink here is a plain append-only collection that
//! callers inspect (or serialize) after the pass completes.
//!
//! # Example
//!
//! ```
//! use trellis_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, FileId, Span};
//!
//! let mut sink = Diagnostics::new();
//! let file = FileId(0);
//! sink.push(
//!     Diagnostic::error(DiagnosticCode::ResourceNotDisposable, "resource is not disposable")
//!         .with_span(Span::new(file, 10, 24))
//!         .build(),
//! );
//! assert!(sink.has_errors());
//! ```

pub mod diagnostic;
pub mod span;

// Re-export commonly used types
pub use diagnostic::{
    Applicability, Diagnostic, DiagnosticBuilder, DiagnosticCode, Diagnostics, RelatedInfo,
    Severity, Suggestion,
};
pub use span::{FileId, Label, Span};

//! Diagnostic types for lowering errors, warnings, and hints.

use crate::span::{Label, Span};
use serde::{Deserialize, Serialize};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational hint (suggestions for improvement)
    Hint,
    /// Warning (lowering succeeds but the result may be surprising)
    Warning,
    /// Error (the construct is invalid; lowering still produces output)
    Error,
}

impl Severity {
    /// Get the string representation for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hint => "hint",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // Type errors (T101-T199)
    /// Resource type exposes no disposal protocol
    ResourceNotDisposable,
    /// Resource type is only asynchronously disposable but the construct
    /// is not marked `await`
    AwaitRequiredForAsyncResource,

    // Structural errors (S101-S199)
    /// A declaration in this position requires an initializer
    InitializerRequired,
    /// An embedded statement cannot be a declaration
    EmbeddedDeclaration,

    // Control-flow-safety errors (F101-F199)
    /// A backward jump crosses a resource declaration that is in scope
    BackwardJumpCrossesResource,
    /// A jump targets a label that is not defined in the enclosing body
    UndefinedLabel,
}

impl DiagnosticCode {
    /// Get the error code string (e.g., "T101").
    pub fn as_str(&self) -> &'static str {
        match self {
            // Type errors
            Self::ResourceNotDisposable => "T101",
            Self::AwaitRequiredForAsyncResource => "T102",

            // Structural errors
            Self::InitializerRequired => "S101",
            Self::EmbeddedDeclaration => "S102",

            // Control-flow-safety errors
            Self::BackwardJumpCrossesResource => "F101",
            Self::UndefinedLabel => "F102",
        }
    }

    /// Get the default severity for this error code.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::ResourceNotDisposable
            | Self::AwaitRequiredForAsyncResource
            | Self::InitializerRequired
            | Self::EmbeddedDeclaration
            | Self::BackwardJumpCrossesResource
            | Self::UndefinedLabel => Severity::Error,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How applicable a suggested fix is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Can be applied automatically with high confidence
    MachineApplicable,
    /// Might need manual review
    MaybeIncorrect,
    /// Just a hint with placeholders, user must decide
    HasPlaceholders,
}

/// A suggested fix for a diagnostic.
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// Description of what this fix does
    pub message: String,
    /// The span to replace
    pub span: Span,
    /// The replacement text
    pub replacement: String,
    /// How confident we are in this fix
    pub applicability: Applicability,
}

impl Suggestion {
    /// Create a new suggestion.
    pub fn new(
        message: impl Into<String>,
        span: Span,
        replacement: impl Into<String>,
        applicability: Applicability,
    ) -> Self {
        Self {
            message: message.into(),
            span,
            replacement: replacement.into(),
            applicability,
        }
    }

    /// Create a machine-applicable suggestion.
    pub fn replace(span: Span, replacement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message, span, replacement, Applicability::MachineApplicable)
    }
}

/// Related information for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedInfo {
    /// Location of related information
    pub span: Span,
    /// Message explaining the relation
    pub message: String,
}

/// A lowering diagnostic with rich information.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Unique error code
    pub code: DiagnosticCode,
    /// Severity level
    pub severity: Severity,
    /// Short message (single line)
    pub message: String,
    /// Longer explanation (optional)
    pub explanation: Option<String>,
    /// Primary span (where the error is)
    pub span: Span,
    /// Additional labels (related locations)
    pub labels: Vec<Label>,
    /// Help/fix suggestions
    pub suggestions: Vec<Suggestion>,
    /// Related diagnostics
    pub related: Vec<RelatedInfo>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, Severity::Error, message)
    }

    /// Create a new warning diagnostic.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, Severity::Warning, message)
    }

    /// Create a diagnostic with the code's default severity.
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, code.default_severity(), message)
    }

    /// Check if this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Check if this is a warning.
    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Builder for constructing diagnostics fluently.
pub struct DiagnosticBuilder {
    inner: Diagnostic,
}

impl DiagnosticBuilder {
    /// Create a new diagnostic builder.
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            inner: Diagnostic {
                code,
                severity,
                message: message.into(),
                explanation: None,
                span: Span::DUMMY,
                labels: Vec::new(),
                suggestions: Vec::new(),
                related: Vec::new(),
            },
        }
    }

    /// Set the primary span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.inner.span = span;
        self
    }

    /// Add a related-location label.
    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.inner.labels.push(Label::new(span, message));
        self
    }

    /// Add a suggestion.
    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.inner.suggestions.push(suggestion);
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.inner.explanation = Some(help.into());
        self
    }

    /// Add related information.
    pub fn with_related(mut self, span: Span, message: impl Into<String>) -> Self {
        self.inner.related.push(RelatedInfo {
            span,
            message: message.into(),
        });
        self
    }

    /// Build the diagnostic.
    pub fn build(self) -> Diagnostic {
        self.inner
    }
}

/// Flat, wire-stable record used when exporting a diagnostic to JSON.
#[derive(Debug, Serialize)]
struct WireDiagnostic<'a> {
    code: DiagnosticCode,
    severity: Severity,
    message: &'a str,
    span: Span,
}

/// Collection of diagnostics with summary statistics.
///
/// This is the sink handed to every lowering pass; passes append and never
/// read back, so ordering is exactly emission order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// All diagnostics
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create a new empty collection.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Extend with multiple diagnostics.
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(diagnostics);
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.is_error())
    }

    /// Count errors.
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    /// Count warnings.
    pub fn warning_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_warning()).count()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of diagnostics.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Iterate over diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Iterate over the diagnostics carrying a given code.
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.code == code)
    }

    /// Export the collection as a JSON array of flat records
    /// (code, severity, message, span). Consumed by tooling sinks.
    pub fn to_json(&self) -> serde_json::Value {
        let wire: Vec<WireDiagnostic<'_>> = self
            .items
            .iter()
            .map(|d| WireDiagnostic {
                code: d.code,
                severity: d.severity,
                message: &d.message,
                span: d.span,
            })
            .collect();
        serde_json::to_value(wire).expect("diagnostic records are serializable")
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

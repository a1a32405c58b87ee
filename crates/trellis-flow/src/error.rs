//! Internal graph-construction failures.
//!
//! These are invariant violations, not user errors: user-facing problems go
//! through the diagnostic sink and never abort construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// The region stack did not return to the root when construction ended.
    #[error("region stack unbalanced: {open} regions left open")]
    UnbalancedRegions { open: usize },

    /// A resource reached graph construction without a classification.
    /// The tree-shaping pass attaches one to every resource, degraded or
    /// not, so this means the caller skipped that pass.
    #[error("resource was not classified before graph construction")]
    UnclassifiedResource,

    /// Cleanup synthesis was requested for a binding with no member.
    #[error("cleanup requested for a resource with no disposal member")]
    MissingDisposeMember,
}

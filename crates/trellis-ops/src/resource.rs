//! Resource classification
//!
//! Given the static type of a resource expression, pick the disposal
//! protocol, the conversion to the disposal-capable type, and the
//! null-guard requirement. Classification never fails hard: when no
//! protocol applies the construct is diagnosed and degrades to a binding
//! with `DisposalProtocol::None`, which downstream passes lower without
//! synthesizing cleanup.

use trellis_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Span};
use trellis_types::{
    Conversion, ConversionKind, DisposalProtocol, DisposeMember, SemanticModel, Type,
};

/// Everything later passes need to know about one resource.
///
/// Created once per resource by [`classify`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBinding {
    /// Selected disposal protocol
    pub protocol: DisposalProtocol,
    /// The member the cleanup synthesizer invokes; `None` when degraded
    pub member: Option<DisposeMember>,
    /// Conversion applied to the resource before the disposal call
    pub conversion: Conversion,
    /// The disposal-capable type the conversion targets
    pub disposal_ty: Type,
    /// The resource is provably the `null` literal
    pub is_constant_null: bool,
    /// Whether cleanup must be guarded by a null test
    pub needs_null_guard: bool,
}

impl ResourceBinding {
    /// Whether any cleanup will be synthesized for this binding.
    pub fn is_disposable(&self) -> bool {
        self.protocol != DisposalProtocol::None
    }

    /// Whether the awaited cleanup shape applies.
    pub fn is_async(&self) -> bool {
        self.protocol == DisposalProtocol::Async
    }
}

/// Tagged classification result.
///
/// `Degraded` means a diagnostic was reported and the binding carries the
/// default no-cleanup shape; the rest of the pipeline proceeds with it
/// unchanged so downstream consumers still receive a complete tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Ok(ResourceBinding),
    Degraded(ResourceBinding),
}

impl Classified {
    pub fn binding(&self) -> &ResourceBinding {
        match self {
            Classified::Ok(b) | Classified::Degraded(b) => b,
        }
    }

    pub fn into_binding(self) -> ResourceBinding {
        match self {
            Classified::Ok(b) | Classified::Degraded(b) => b,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Classified::Degraded(_))
    }
}

/// Classify a resource of static type `ty`.
///
/// `constant_null` is the binder's constant classification of the resource
/// expression; `is_await` marks `await`-form constructs.
pub fn classify(
    ty: &Type,
    constant_null: bool,
    is_await: bool,
    span: Span,
    model: &dyn SemanticModel,
    diags: &mut Diagnostics,
) -> Classified {
    // Failed binding upstream: degrade silently, the binder already
    // reported the expression itself.
    if matches!(ty, Type::Error) {
        return Classified::Degraded(degraded_binding(ty, constant_null, model));
    }

    // The null literal converts to the disposal interface directly. The
    // cleanup shape is kept (guard + dispose + join) so analyzers see the
    // full structure; the dispose block will be unreachable.
    if constant_null || matches!(ty, Type::Null) {
        let iface = disposal_interface(model, is_await);
        let member = interface_member(model, is_await);
        return Classified::Ok(ResourceBinding {
            protocol: if is_await {
                DisposalProtocol::Async
            } else {
                DisposalProtocol::Sync
            },
            member,
            conversion: Conversion::of(ConversionKind::NullLiteral),
            disposal_ty: iface,
            is_constant_null: true,
            needs_null_guard: true,
        });
    }

    // `dynamic` resources defer the membership check to runtime: protocol
    // is the synchronous one, but the conversion must be an explicit
    // dynamic cast evaluated exactly once.
    if ty.is_dynamic() {
        let iface = disposal_interface(model, is_await);
        let member = interface_member(model, is_await);
        return Classified::Ok(ResourceBinding {
            protocol: if is_await {
                DisposalProtocol::Async
            } else {
                DisposalProtocol::Sync
            },
            member,
            conversion: Conversion::of(ConversionKind::ExplicitDynamic),
            disposal_ty: iface,
            is_constant_null: false,
            needs_null_guard: true,
        });
    }

    if is_await {
        classify_await(ty, span, model, diags)
    } else {
        classify_sync(ty, span, model, diags)
    }
}

fn classify_sync(
    ty: &Type,
    span: Span,
    model: &dyn SemanticModel,
    diags: &mut Diagnostics,
) -> Classified {
    if let Some(member) = model.sync_dispose(ty) {
        let iface = model.sync_disposal_interface();
        let conversion = model.classify_conversion(ty, &iface);
        return Classified::Ok(finish_binding(
            DisposalProtocol::Sync,
            member,
            conversion,
            iface,
            ty,
        ));
    }

    if let Some(member) = model.pattern_dispose(ty).filter(|m| !m.is_async) {
        // Pattern disposal calls the member on the receiver's own type;
        // no conversion is involved.
        return Classified::Ok(finish_binding(
            DisposalProtocol::Pattern,
            member,
            Conversion::IDENTITY,
            ty.clone(),
            ty,
        ));
    }

    if model.async_dispose(ty).is_some()
        || model.pattern_dispose(ty).filter(|m| m.is_async).is_some()
    {
        diags.push(
            Diagnostic::new(
                DiagnosticCode::AwaitRequiredForAsyncResource,
                format!(
                    "resource of type `{}` can only be disposed asynchronously; mark the statement with `await`",
                    ty
                ),
            )
            .with_span(span)
            .build(),
        );
        return Classified::Degraded(degraded_binding(ty, false, model));
    }

    diags.push(not_disposable(ty, &model.sync_disposal_interface(), span));
    Classified::Degraded(degraded_binding(ty, false, model))
}

fn classify_await(
    ty: &Type,
    span: Span,
    model: &dyn SemanticModel,
    diags: &mut Diagnostics,
) -> Classified {
    if let Some(member) = model.async_dispose(ty) {
        let iface = model.async_disposal_interface();
        let conversion = model.classify_conversion(ty, &iface);
        return Classified::Ok(finish_binding(
            DisposalProtocol::Async,
            member,
            conversion,
            iface,
            ty,
        ));
    }

    // Awaited pattern disposal: resolved by member lookup, still the
    // asynchronous cleanup shape.
    if let Some(member) = model.pattern_dispose(ty).filter(|m| m.is_async) {
        return Classified::Ok(finish_binding(
            DisposalProtocol::Async,
            member,
            Conversion::IDENTITY,
            ty.clone(),
            ty,
        ));
    }

    diags.push(not_disposable(ty, &model.async_disposal_interface(), span));
    Classified::Degraded(degraded_binding(ty, false, model))
}

fn finish_binding(
    protocol: DisposalProtocol,
    member: DisposeMember,
    conversion: Conversion,
    disposal_ty: Type,
    resource_ty: &Type,
) -> ResourceBinding {
    ResourceBinding {
        protocol,
        member: Some(member),
        conversion,
        disposal_ty,
        is_constant_null: false,
        // Non-nullable value types never hold null; the guard is omitted
        // and cleanup runs unconditionally.
        needs_null_guard: resource_ty.admits_null(),
    }
}

/// The default binding for a construct whose classification failed. The
/// recorded conversion is the best-effort explicit cast to the disposal
/// interface, so consumers of degraded trees still see a consistent shape.
fn degraded_binding(ty: &Type, constant_null: bool, model: &dyn SemanticModel) -> ResourceBinding {
    ResourceBinding {
        protocol: DisposalProtocol::None,
        member: None,
        conversion: Conversion::of(ConversionKind::ExplicitReference),
        disposal_ty: model.sync_disposal_interface(),
        is_constant_null: constant_null,
        needs_null_guard: ty.admits_null(),
    }
}

fn disposal_interface(model: &dyn SemanticModel, is_await: bool) -> Type {
    if is_await {
        model.async_disposal_interface()
    } else {
        model.sync_disposal_interface()
    }
}

/// The disposal member declared by the interface itself, used when the
/// receiver is converted to the interface first (null literal, `dynamic`).
fn interface_member(model: &dyn SemanticModel, is_await: bool) -> Option<DisposeMember> {
    if is_await {
        model.async_dispose(&model.async_disposal_interface())
    } else {
        model.sync_dispose(&model.sync_disposal_interface())
    }
}

fn not_disposable(ty: &Type, iface: &Type, span: Span) -> Diagnostic {
    Diagnostic::new(
        DiagnosticCode::ResourceNotDisposable,
        format!(
            "resource of type `{}` must be implicitly convertible to `{}`",
            ty, iface
        ),
    )
    .with_span(span)
    .build()
}

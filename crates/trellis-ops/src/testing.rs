//! Shared test fixtures.

use std::cell::RefCell;
use std::collections::HashMap;

use trellis_types::{Conversion, ConversionKind, DisposeMember, SemanticModel, Type, TypeKind};

const SYNC_IFACE: &str = "Disposable";
const ASYNC_IFACE: &str = "AsyncDisposable";

/// Table-driven [`SemanticModel`] used across the test suites.
///
/// Types are registered by name with the protocols they support; everything
/// unregistered is not disposable. Registration goes through `RefCell` so
/// tests can build types inline while holding a shared reference.
#[derive(Default)]
pub struct TestModel {
    sync: RefCell<HashMap<String, DisposeMember>>,
    asynchronous: RefCell<HashMap<String, DisposeMember>>,
    pattern: RefCell<HashMap<String, DisposeMember>>,
}

impl TestModel {
    pub fn new() -> Self {
        let model = Self::default();
        // The interfaces themselves expose their own member.
        model
            .sync
            .borrow_mut()
            .insert(SYNC_IFACE.into(), DisposeMember::sync(SYNC_IFACE, "close"));
        model.asynchronous.borrow_mut().insert(
            ASYNC_IFACE.into(),
            DisposeMember::asynchronous(ASYNC_IFACE, "closeAsync"),
        );
        model
    }

    /// Register a class implementing the synchronous disposal interface.
    pub fn disposable_class(&self, name: &str) -> Type {
        self.register_sync(name);
        Type::class(name)
    }

    /// Register a value struct implementing the synchronous disposal interface.
    pub fn disposable_struct(&self, name: &str) -> Type {
        self.register_sync(name);
        Type::value_struct(name)
    }

    /// Register a class implementing the asynchronous disposal interface.
    pub fn async_disposable_class(&self, name: &str) -> Type {
        self.asynchronous.borrow_mut().insert(
            name.into(),
            DisposeMember::asynchronous(ASYNC_IFACE, "closeAsync"),
        );
        Type::class(name)
    }

    /// Register a class implementing both disposal interfaces.
    pub fn dual_disposable_class(&self, name: &str) -> Type {
        self.register_sync(name);
        self.asynchronous.borrow_mut().insert(
            name.into(),
            DisposeMember::asynchronous(ASYNC_IFACE, "closeAsync"),
        );
        Type::class(name)
    }

    /// Register a class with a pattern `close()` member and no interface.
    pub fn pattern_class(&self, name: &str) -> Type {
        self.pattern
            .borrow_mut()
            .insert(name.into(), DisposeMember::sync(name, "close"));
        Type::class(name)
    }

    /// Register a struct with an awaitable pattern `closeAsync()` member.
    pub fn async_pattern_struct(&self, name: &str) -> Type {
        self.pattern
            .borrow_mut()
            .insert(name.into(), DisposeMember::asynchronous(name, "closeAsync"));
        Type::value_struct(name)
    }

    fn register_sync(&self, name: &str) {
        self.sync
            .borrow_mut()
            .insert(name.into(), DisposeMember::sync(SYNC_IFACE, "close"));
    }

    fn lookup(table: &RefCell<HashMap<String, DisposeMember>>, ty: &Type) -> Option<DisposeMember> {
        match ty.strip_nullable() {
            Type::Named { name, .. } => table.borrow().get(name).cloned(),
            _ => None,
        }
    }
}

impl SemanticModel for TestModel {
    fn sync_disposal_interface(&self) -> Type {
        Type::interface(SYNC_IFACE)
    }

    fn async_disposal_interface(&self) -> Type {
        Type::interface(ASYNC_IFACE)
    }

    fn sync_dispose(&self, ty: &Type) -> Option<DisposeMember> {
        Self::lookup(&self.sync, ty)
    }

    fn async_dispose(&self, ty: &Type) -> Option<DisposeMember> {
        Self::lookup(&self.asynchronous, ty)
    }

    fn pattern_dispose(&self, ty: &Type) -> Option<DisposeMember> {
        Self::lookup(&self.pattern, ty)
    }

    fn classify_conversion(&self, from: &Type, to: &Type) -> Conversion {
        if from == to {
            return Conversion::IDENTITY;
        }
        match from {
            Type::Null => Conversion::of(ConversionKind::NullLiteral),
            Type::Dynamic => Conversion::of(ConversionKind::ExplicitDynamic),
            Type::Nullable(_) => Conversion::of(ConversionKind::Boxing),
            Type::Named {
                kind: TypeKind::Struct,
                ..
            } => Conversion::of(ConversionKind::Boxing),
            Type::Named { .. } | Type::String => Conversion::of(ConversionKind::ImplicitReference),
            _ => Conversion::NONE,
        }
    }
}

//! Type system for Trellis
//!
//! Defines the type representations the lowering layer works with, plus the
//! semantic services it consumes: disposal-member lookup and conversion
//! classification. Trellis never performs name or overload resolution
//! itself; the hosting binder implements [`SemanticModel`] and the lowering
//! passes ask it the few questions they need.

/// Unique identifier for local variables within one lowered body
pub type LocalId = u32;

/// Unique identifier for flow-capture slots within one control-flow graph
pub type CaptureId = u32;

/// Kind of a named (user-declared) type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference type with identity
    Class,
    /// Value type; never `null` unless wrapped in `Nullable`
    Struct,
    /// Abstract contract type; reference-shaped
    Interface,
}

/// Core type representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// No value
    Void,
    /// The type of the `null` literal before conversion
    Null,
    /// Boolean type
    Bool,
    /// 32-bit integer type
    Int32,
    /// 64-bit float type
    Float64,
    /// String type (reference-shaped)
    String,
    /// User-declared named type
    Named {
        /// Declared name
        name: String,
        /// Class, struct, or interface
        kind: TypeKind,
    },
    /// Value type lifted to admit `null`
    Nullable(Box<Type>),
    /// Asynchronous operation producing a value of the inner type
    Task(Box<Type>),
    /// Statically unresolved type; member lookup deferred to runtime
    Dynamic,
    /// Error type produced by failed binding; propagates without cascading
    Error,
}

impl Type {
    /// Shorthand for a named class type.
    pub fn class(name: impl Into<String>) -> Self {
        Type::Named {
            name: name.into(),
            kind: TypeKind::Class,
        }
    }

    /// Shorthand for a named struct (value) type.
    pub fn value_struct(name: impl Into<String>) -> Self {
        Type::Named {
            name: name.into(),
            kind: TypeKind::Struct,
        }
    }

    /// Shorthand for a named interface type.
    pub fn interface(name: impl Into<String>) -> Self {
        Type::Named {
            name: name.into(),
            kind: TypeKind::Interface,
        }
    }

    /// Check if this type is a primitive.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Void | Type::Null | Type::Bool | Type::Int32 | Type::Float64 | Type::String
        )
    }

    /// Check if this type has value semantics (and therefore can never hold
    /// the constant `null` unless lifted through `Nullable`).
    pub fn is_value_type(&self) -> bool {
        match self {
            Type::Bool | Type::Int32 | Type::Float64 => true,
            Type::Named {
                kind: TypeKind::Struct,
                ..
            } => true,
            _ => false,
        }
    }

    /// Check if a value of this type may be `null` at runtime.
    pub fn admits_null(&self) -> bool {
        match self {
            Type::Null | Type::Nullable(_) | Type::Dynamic | Type::Error | Type::String => true,
            Type::Named { kind, .. } => !matches!(kind, TypeKind::Struct),
            _ => false,
        }
    }

    /// Check if this is the statically unresolved type.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Dynamic)
    }

    /// Strip one level of `Nullable`, if present.
    pub fn strip_nullable(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Bool => write!(f, "bool"),
            Type::Int32 => write!(f, "int32"),
            Type::Float64 => write!(f, "float64"),
            Type::String => write!(f, "string"),
            Type::Named { name, .. } => write!(f, "{}", name),
            Type::Nullable(inner) => write!(f, "{}?", inner),
            Type::Task(inner) => write!(f, "task<{}>", inner),
            Type::Dynamic => write!(f, "dynamic"),
            Type::Error => write!(f, "<error>"),
        }
    }
}

/// Classification of the conversion connecting two types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// Types are identical; the conversion is a no-op
    Identity,
    /// Reference conversion guaranteed to succeed (derived to base/interface)
    ImplicitReference,
    /// Reference conversion checked at runtime
    ExplicitReference,
    /// Value type converted to a reference-shaped representation
    Boxing,
    /// Reference representation converted back to a value type
    Unboxing,
    /// The `null` literal adopting a reference target type
    NullLiteral,
    /// Runtime-checked conversion out of `dynamic`
    ExplicitDynamic,
}

/// A classified conversion between two types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Whether any conversion connects the types at all
    pub exists: bool,
    /// The kind, meaningful only when `exists`
    pub kind: ConversionKind,
}

impl Conversion {
    /// The no-op identity conversion.
    pub const IDENTITY: Conversion = Conversion {
        exists: true,
        kind: ConversionKind::Identity,
    };

    /// The absent conversion: the types are unrelated.
    pub const NONE: Conversion = Conversion {
        exists: false,
        kind: ConversionKind::Identity,
    };

    /// Create an existing conversion of the given kind.
    pub fn of(kind: ConversionKind) -> Self {
        Conversion { exists: true, kind }
    }

    /// Check whether this conversion is a no-op.
    pub fn is_identity(&self) -> bool {
        self.exists && self.kind == ConversionKind::Identity
    }
}

/// A resolved disposal member: the method the cleanup synthesizer invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposeMember {
    /// Method name (e.g. `close`, `closeAsync`)
    pub name: String,
    /// Name of the type or interface declaring the member
    pub owner: String,
    /// Return type; `Task<void>`-shaped for asynchronous members
    pub returns: Type,
    /// Whether invoking this member yields an awaitable
    pub is_async: bool,
}

impl DisposeMember {
    /// The synchronous member of the disposal interface.
    pub fn sync(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            returns: Type::Void,
            is_async: false,
        }
    }

    /// The asynchronous member of the async disposal interface.
    pub fn asynchronous(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            returns: Type::Task(Box::new(Type::Void)),
            is_async: true,
        }
    }
}

/// Disposal protocol selected for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalProtocol {
    /// No applicable protocol; cleanup is not synthesized
    None,
    /// Synchronous call through the disposal interface
    Sync,
    /// Awaited asynchronous call through the async disposal interface
    Async,
    /// Synchronous call resolved by pattern lookup rather than conformance
    Pattern,
}

/// The semantic services Trellis consumes from the hosting binder.
///
/// Implementations answer disposal-member lookups and classify conversions;
/// they are expected to be pure with respect to one lowering pass.
pub trait SemanticModel {
    /// The synchronous disposal interface type (conversion target for
    /// interface-conforming resources).
    fn sync_disposal_interface(&self) -> Type;

    /// The asynchronous disposal interface type.
    fn async_disposal_interface(&self) -> Type;

    /// The synchronous disposal member exposed by `ty` through interface
    /// conformance, if any.
    fn sync_dispose(&self, ty: &Type) -> Option<DisposeMember>;

    /// The asynchronous disposal member exposed by `ty`, if any.
    fn async_dispose(&self, ty: &Type) -> Option<DisposeMember>;

    /// An applicable pattern-based (duck-typed) disposal member on `ty`,
    /// found by member lookup rather than interface conformance.
    fn pattern_dispose(&self, ty: &Type) -> Option<DisposeMember>;

    /// Classify the conversion connecting `from` to `to`.
    fn classify_conversion(&self, from: &Type, to: &Type) -> Conversion;
}

//! Type model shared by the signature parser, the subtype lattice, and the analyses.
//!
//! Types are interned by a `TypeRepository` and referred to through `TypeId`
//! handles, so equality of two interned types is equality of their ids. The
//! primitive kinds, the lattice sentinels, and the three universal array
//! supertypes occupy fixed ids that every repository pre-registers.

use std::fmt;

pub(crate) const OBJECT_CLASS: &str = "java/lang/Object";
pub(crate) const SERIALIZABLE_CLASS: &str = "java/io/Serializable";
pub(crate) const CLONEABLE_CLASS: &str = "java/lang/Cloneable";

pub(crate) const NULL_SIGNATURE: &str = "@null";
pub(crate) const TOP_SIGNATURE: &str = "@top";
pub(crate) const BOTTOM_SIGNATURE: &str = "@bottom";

/// Handle to a type interned in a `TypeRepository`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct TypeId(u32);

impl TypeId {
    pub(crate) const NULL: TypeId = TypeId(9);
    pub(crate) const TOP: TypeId = TypeId(10);
    pub(crate) const BOTTOM: TypeId = TypeId(11);
    pub(crate) const OBJECT: TypeId = TypeId(12);
    pub(crate) const SERIALIZABLE: TypeId = TypeId(13);
    pub(crate) const CLONEABLE: TypeId = TypeId(14);

    /// Number of ids every repository registers up front.
    pub(crate) const RESERVED: usize = 15;

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// True for the root object type and the two marker interfaces every array implements.
    pub(crate) fn is_universal_array_supertype(self) -> bool {
        matches!(self, Self::OBJECT | Self::SERIALIZABLE | Self::CLONEABLE)
    }
}

/// Primitive kinds and `void`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum BaseType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl BaseType {
    pub(crate) const ALL: [BaseType; 9] = [
        BaseType::Boolean,
        BaseType::Byte,
        BaseType::Char,
        BaseType::Short,
        BaseType::Int,
        BaseType::Long,
        BaseType::Float,
        BaseType::Double,
        BaseType::Void,
    ];

    pub(crate) fn code(self) -> char {
        match self {
            BaseType::Boolean => 'Z',
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Short => 'S',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Float => 'F',
            BaseType::Double => 'D',
            BaseType::Void => 'V',
        }
    }

    pub(crate) fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|base| base.code() == code)
    }

    pub(crate) fn java_name(self) -> &'static str {
        match self {
            BaseType::Boolean => "boolean",
            BaseType::Byte => "byte",
            BaseType::Char => "char",
            BaseType::Short => "short",
            BaseType::Int => "int",
            BaseType::Long => "long",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Void => "void",
        }
    }

    /// Local-variable and operand-stack slots a value of this kind occupies.
    pub(crate) fn slot_size(self) -> usize {
        match self {
            BaseType::Long | BaseType::Double => 2,
            BaseType::Void => 0,
            _ => 1,
        }
    }

    pub(crate) fn type_id(self) -> TypeId {
        TypeId(self as u32)
    }
}

/// Bound of a wildcard type argument.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum WildcardBound {
    Unbounded,
    Extends(TypeId),
    Super(TypeId),
}

/// Structural variant of an interned type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum TypeKind {
    Base(BaseType),
    /// Class or interface, by slashed binary name.
    Class(String),
    /// Element is never itself an array.
    Array {
        dimensions: u32,
        element: TypeId,
    },
    Null,
    Top,
    Bottom,
    TypeVariable(String),
    Wildcard(WildcardBound),
    Parameterized {
        base: TypeId,
        arguments: Vec<TypeId>,
    },
}

/// One interned type and its canonical signature.
#[derive(Clone, Debug)]
pub(crate) struct TypeEntry {
    pub(crate) kind: TypeKind,
    pub(crate) signature: String,
}

impl fmt::Display for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature)
    }
}

/// Normalize a dotted or slashed class name to the slashed binary form.
pub(crate) fn slashed_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Dotted Java name for a slashed binary class name.
pub(crate) fn dotted_name(name: &str) -> String {
    name.replace('/', ".")
}

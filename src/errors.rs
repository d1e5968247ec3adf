//! Typed errors raised by the type model, the dataflow engine, and the property database.

use thiserror::Error;

pub(crate) type SignatureResult<T> = Result<T, SignatureError>;
pub(crate) type HierarchyResult<T> = Result<T, HierarchyError>;
pub(crate) type DataflowResult<T> = Result<T, DataflowError>;
pub(crate) type DatabaseResult<T> = Result<T, DatabaseError>;

/// Signature text that violates the signature grammar.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub(crate) enum SignatureError {
    #[error("malformed signature {signature:?} at position {position}: {reason}")]
    Malformed {
        signature: String,
        position: usize,
        reason: String,
    },
}

/// Failures of subtype and join queries.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub(crate) enum HierarchyError {
    #[error("class not found in hierarchy: {0}")]
    ClassNotFound(String),

    #[error("type {0} cannot take part in a subtype query")]
    UnsupportedOperand(String),
}

/// A property database line that cannot be decoded.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("property database line {line}: {reason}: {content:?}")]
pub(crate) struct DatabaseFormatError {
    pub(crate) line: usize,
    pub(crate) content: String,
    pub(crate) reason: String,
}

/// Failures of a single method's dataflow run.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub(crate) enum DataflowError {
    #[error("invalid fact: {0}")]
    InvalidFact(String),

    #[error("block {block} visited more than {limit} times")]
    IterationLimit { block: u32, limit: usize },

    #[error("unknown basic block {0}")]
    UnknownBlock(u32),
}

/// Value-numbering input the analyses refuse to size facts from.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub(crate) enum ValueNumberError {
    #[error("num_values {found} exceeds the limit of {limit}")]
    TooManyValues { found: u32, limit: u32 },
}

/// Failures reading a property database.
#[derive(Debug, Error)]
pub(crate) enum DatabaseError {
    #[error("failed to read property database")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] DatabaseFormatError),
}

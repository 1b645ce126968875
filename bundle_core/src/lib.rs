#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Bundle_core is the pure kernel of the bundle engine: resource-id
//! validation, reference extraction, deterministic dependency ordering,
//! expression resolution, and the drift comparator.
//!
//! Nothing in this crate performs I/O or keeps shared state; every function
//! is safe to call concurrently on independent inputs.

pub mod compare;
pub mod extract;
pub mod ident;
pub mod order;
pub mod resolve;
pub mod validate;

pub use api::v1alpha1::{ResourceSpec, StatusMap};

/// Error enumerates the failures reported by this crate.
///
/// Ordering and expression-evaluation failures are fatal to their call;
/// partial results are never returned alongside one of these.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// UnknownDependency means a reference points at no declared resource id.
    #[error("resource {id:?} depends on unknown resource {dependency:?}")]
    UnknownDependency {
        /// Id of the resource carrying the dangling reference.
        id: String,
        /// The referenced id that no resource declares.
        dependency: String,
    },
    /// CircularDependency means no topological order exists.
    #[error("circular dependency among resources: {remaining:?}")]
    CircularDependency {
        /// Ids that could not be scheduled.
        remaining: Vec<String>,
    },
    /// ResourceNotFound means an expression references an id absent from the
    /// status map.
    #[error("expression references unknown resource {0:?}")]
    ResourceNotFound(String),
    /// UnsupportedExpression means the expression does not match the
    /// resolvable `resources.<id>.<segment>…` grammar.
    #[error("unsupported expression {0:?}")]
    UnsupportedExpression(String),
    /// InvalidResourceId means a declared id does not match the id grammar.
    #[error("invalid resource id {0:?}: must match [a-z][a-z0-9-]*")]
    InvalidResourceId(String),
    /// DuplicateResourceId means two resources declare the same id.
    #[error("duplicate resource id {0:?}")]
    DuplicateResourceId(String),
}

/// Result typedef for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

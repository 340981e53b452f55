//! Error kinds raised by the inode layer, per the error handling design.
//!
//! The dispatch layer (out of scope here) maps these onto the errno the
//! kernel expects; this crate only needs to keep the *kind* discoverable
//! so that mapping can happen without string matching.
use thiserror::Error;

/// Errors produced by inode-layer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The named object (or directory placeholder) does not exist.
    /// Lookup/delete paths recover from this; it is never propagated to
    /// the caller of `LookUpChild` or `DeleteChild*`.
    #[error("not found: {0}")]
    NotFound(String),

    /// A generation precondition failed. During create, this means the
    /// name already exists (mapped to EEXIST by the dispatch layer).
    /// During update/sync it is absorbed as "unlinked".
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The remote object changed under a dirty local writer: generation
    /// mismatch, or size increased at the same generation (a remote
    /// append). Distinct from other store errors so Sync/Write/Flush can
    /// let the caller discard the dirty content.
    #[error("clobbered: {0}")]
    Clobbered(String),

    /// The requested operation has no meaning for this inode kind
    /// (mutating the base-of-buckets directory, listing-of-buckets,
    /// out-of-order writes on a streaming writer when promotion is
    /// disabled).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The operation's cancellation token fired before completion.
    #[error("cancelled")]
    Cancelled,

    /// A caller-supplied argument violated an invariant this layer
    /// assumes holds (e.g. an empty relative name). Distinct from
    /// `Unsupported`: this indicates a caller bug, not a missing feature.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Any other store error, wrapped with a short prefix naming the
    /// operation for debugging, while keeping kind discoverable.
    #[error("{op}: {source}")]
    InternalStore {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn internal_store(
        op: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::InternalStore {
            op,
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Translates an [object_store::Error] into our [Error], preserving
/// `NotFound` and precondition-failure identity and wrapping everything
/// else as `InternalStore` tagged with the operation name.
pub fn from_object_store(op: &'static str, e: object_store::Error) -> Error {
    match e {
        object_store::Error::NotFound { path, .. } => Error::NotFound(path),
        object_store::Error::AlreadyExists { path, .. } => {
            Error::Precondition(format!("{path} already exists"))
        }
        object_store::Error::Precondition { path, .. } => {
            Error::Precondition(format!("precondition failed for {path}"))
        }
        other => Error::internal_store(op, other),
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::internal_store("spawned task", value)
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        use std::io::ErrorKind;
        match value {
            Error::NotFound(msg) => Self::new(ErrorKind::NotFound, msg),
            Error::Precondition(msg) => Self::new(ErrorKind::AlreadyExists, msg),
            Error::Clobbered(msg) => Self::new(ErrorKind::Other, msg),
            Error::Unsupported(msg) => {
                Self::new(ErrorKind::Unsupported, msg)
            }
            Error::Cancelled => Self::new(ErrorKind::Interrupted, "cancelled"),
            Error::Invalid(msg) => Self::new(ErrorKind::InvalidInput, msg),
            Error::InternalStore { op, source } => {
                Self::new(ErrorKind::Other, format!("{op}: {source}"))
            }
        }
    }
}

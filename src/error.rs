//! Domain error taxonomy shared by the ledger, sharing model and web layer.

use crate::storage::StorageError;

#[derive(Debug)]
pub enum CotaskError {
    /// The permission resolver denied the action.
    Forbidden(String),
    NotFound(String),
    AlreadyExists(String),
    /// The caller targeted themselves (self share, self connection request).
    SelfReference(String),
    Validation(String),
    Unauthenticated,
    /// Store or IO failure. The user may retry the action by hand.
    TransientStore(String),
}

impl CotaskError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        CotaskError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CotaskError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CotaskError::Validation(msg.into())
    }

    /// Short machine-readable kind, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CotaskError::Forbidden(_) => "forbidden",
            CotaskError::NotFound(_) => "not_found",
            CotaskError::AlreadyExists(_) => "already_exists",
            CotaskError::SelfReference(_) => "self_reference",
            CotaskError::Validation(_) => "validation",
            CotaskError::Unauthenticated => "unauthenticated",
            CotaskError::TransientStore(_) => "transient_store",
        }
    }
}

impl std::fmt::Display for CotaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CotaskError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            CotaskError::NotFound(msg) => write!(f, "not found: {msg}"),
            CotaskError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            CotaskError::SelfReference(msg) => write!(f, "cannot target yourself: {msg}"),
            CotaskError::Validation(msg) => write!(f, "invalid input: {msg}"),
            CotaskError::Unauthenticated => write!(f, "not signed in"),
            // The detail is logged where it happens; users only see this.
            CotaskError::TransientStore(_) => {
                write!(f, "something went wrong, please try again")
            }
        }
    }
}

impl std::error::Error for CotaskError {}

impl From<StorageError> for CotaskError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => CotaskError::NotFound(msg),
            StorageError::AlreadyExists(msg) => CotaskError::AlreadyExists(msg),
            other => {
                crate::clog!("store: {other}");
                CotaskError::TransientStore(other.to_string())
            }
        }
    }
}

pub type CotaskResult<T> = Result<T, CotaskError>;

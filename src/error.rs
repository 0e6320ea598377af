//! # Error
//!
//! Crate-wide error taxonomy. Lower layers keep their own error types and are wrapped here.

use thiserror::Error;

use crate::hook::HookError;
use crate::scan::ScanError;

/// Errors surfaced by the bridges, the configuration layer and the engine
#[derive(Debug, Error)]
pub enum Error {
    /// A labeled signature could not be found; only the dependent feature is disabled
    #[error("signature not found: {label}")]
    NotFound {
        /// Label of the signature that was searched for
        label: String,
    },
    /// Target address is already owned by another hook
    #[error("address {0:#x} is already hooked")]
    AlreadyHooked(usize),
    /// Operation is not valid for the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// An argument was empty or outside its enumerated set
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A subscriber or menu action returned an error or panicked
    #[error("subscriber {subscriber} faulted: {message}")]
    SubscriberFault {
        /// Subscription or menu entry that faulted
        subscriber: String,
        /// Rendered error or panic message
        message: String,
    },
    /// Hook lifecycle failure
    #[error(transparent)]
    Hook(HookError),
    /// Signature parsing failure
    #[error(transparent)]
    Scan(ScanError),
    /// IO error while loading or saving configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON error while loading or saving configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<HookError> for Error {
    fn from(e: HookError) -> Self {
        match e {
            HookError::AlreadyHooked(address) => Self::AlreadyHooked(address),
            HookError::InvalidState(state) => Self::InvalidState(state),
            e => Self::Hook(e),
        }
    }
}

impl From<ScanError> for Error {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::NotFound(pattern) => Self::NotFound { label: pattern },
            e => Self::Scan(e),
        }
    }
}

/// Result alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error only means a feature is unavailable, not that something went wrong
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

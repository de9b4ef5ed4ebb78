//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation, illegal
/// lifecycle moves, ledger guards). Infrastructure concerns belong elsewhere.
/// Every variant is recoverable by the caller; a rejected operation leaves no
/// partial writes behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A field value failed validation (e.g. zero quantity, percent out of range).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A status change outside the document's legal transition set.
    #[error("invalid transition: {current} -> {requested}")]
    InvalidTransition { current: String, requested: String },

    /// A lead (or quotation) was already converted; conversion is at-most-once.
    #[error("already converted")]
    AlreadyConverted,

    /// A payment would drive the remaining balance below zero.
    #[error("insufficient balance: remaining {remaining}, attempted {attempted}")]
    InsufficientBalance { remaining: i64, attempted: i64 },

    /// An issue/return would drive stock below zero.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// A referenced entity (product, party, document) does not exist.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. duplicate creation, stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(
        current: impl core::fmt::Display,
        requested: impl core::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            current: current.to_string(),
            requested: requested.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

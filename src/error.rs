//! Error types for cash session reconciliation.
//!
//! The four data-integrity kinds (`InvalidAmount`, `InvalidCount`,
//! `InvalidInvoiceDiscount`, `IncompleteSession`) are raised where they are
//! detected and are never retried: they need a human to correct the data.
//! The remaining variants cover the SQLite layer and the fetch fan-out.

use thiserror::Error;

use crate::money::MoneyAmount;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A monetary input that cannot be represented exactly at two decimals,
    /// or a negative amount where only non-negative ones are allowed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A negative quantity in a denomination count or invoice line.
    #[error("invalid count: {0}")]
    InvalidCount(String),

    #[error("invoice {invoice_id}: discount {discount} exceeds subtotal {subtotal}")]
    InvalidInvoiceDiscount {
        invoice_id: String,
        subtotal: MoneyAmount,
        discount: MoneyAmount,
    },

    /// Denomination counts were never entered for the session.
    #[error("session {0} has no counted cash in the local currency")]
    IncompleteSession(String),

    #[error("cash session not found: {0}")]
    SessionNotFound(String),

    #[error("a cash session already exists for {0}")]
    DuplicateSession(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration v{version} failed: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("upstream fetch timed out after {0}ms")]
    FetchTimeout(u128),

    #[error("upstream fetch task failed: {0}")]
    FetchTask(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// True for the kinds that indicate bad source data rather than an
    /// infrastructure fault.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidCount(_)
                | Self::InvalidInvoiceDiscount { .. }
                | Self::IncompleteSession(_)
        )
    }
}

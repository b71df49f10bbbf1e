//! Error types for proofkv using snafu.
//!
//! [`StoreError`] is the closed taxonomy every public store operation returns.
//! Each variant maps to an [`ErrorCode`] with a unique numeric identifier,
//! retryability classification, and suggested recovery action, and to an
//! [`ErrorKind`] that callers can match exhaustively.
//!
//! Proof verification never produces an error: the verifier answers with a
//! boolean, because a forged proof is an expected input rather than a bug.

use core::fmt;

use snafu::{Location, Snafu};

use crate::types::TxId;

/// Unified result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range       | Domain     | Examples                                   |
/// |-------------|------------|--------------------------------------------|
/// | 1000–1099   | Storage    | I/O failure on append, corrupted segment   |
/// | 3000–3099   | Validation | Illegal argument, duplicate key, empty set |
/// | 3100–3199   | Not found  | Transaction, key, unresolved reference     |
/// | 3200–3299   | Internal   | Invariant violation                        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Storage errors (1000–1099) ---
    /// Durability or I/O failure; the batch was not committed.
    StorageFailure = 1000,
    /// Persisted data failed an integrity check.
    StorageCorruption = 1001,

    // --- Validation errors (3000–3099) ---
    /// Malformed argument or batch element.
    IllegalArgument = 3000,
    /// Same key written twice in one batch.
    DuplicateKey = 3001,
    /// Same `(set, key)` added twice in one batch.
    DuplicateZAdd = 3002,
    /// Batch without operations.
    EmptyBatch = 3003,

    // --- Not-found errors (3100–3199) ---
    /// Transaction id does not exist.
    TxNotFound = 3100,
    /// Key absent at the requested point in history.
    KeyNotFound = 3101,
    /// Reference target cannot be resolved.
    ReferenceUnresolved = 3102,

    // --- Internal errors (3200–3299) ---
    /// Unexpected state or invariant violation.
    Internal = 3200,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StorageFailure),
            1001 => Some(Self::StorageCorruption),
            3000 => Some(Self::IllegalArgument),
            3001 => Some(Self::DuplicateKey),
            3002 => Some(Self::DuplicateZAdd),
            3003 => Some(Self::EmptyBatch),
            3100 => Some(Self::TxNotFound),
            3101 => Some(Self::KeyNotFound),
            3102 => Some(Self::ReferenceUnresolved),
            3200 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Only transient storage failures may succeed on a later attempt. A
    /// transaction that does not exist yet may appear later, so a pinned
    /// lookup is retryable too.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StorageFailure | Self::TxNotFound)
    }

    /// Suggested recovery action for this error code.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StorageFailure => {
                "Check disk space, filesystem permissions, and I/O health. Reopen the store if it entered the failed state."
            },
            Self::StorageCorruption => {
                "Restore from the most recent backup. The log or node store failed an integrity check."
            },
            Self::IllegalArgument => "Fix the request parameters and resubmit.",
            Self::DuplicateKey => "Write each key at most once per batch.",
            Self::DuplicateZAdd => "Add each (set, key) pair at most once per batch.",
            Self::EmptyBatch => "Submit at least one operation.",
            Self::TxNotFound => {
                "Verify the transaction id against the store's latest state, or retry once it is committed."
            },
            Self::KeyNotFound => "Expected for first reads. Write the key before reading it.",
            Self::ReferenceUnresolved => {
                "Write the target key in the same batch or pin the reference to a transaction that contains it."
            },
            Self::Internal => {
                "Unexpected state or invariant violation. Collect context and report as an issue."
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Coarse error classification for exhaustive matching by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty key, malformed batch element, limit exceeded.
    IllegalArgument,
    /// Same key twice in one batch.
    DuplicateKey,
    /// Same set/key ZAdd twice in one batch.
    DuplicateIndexEntry,
    /// Batch without operations.
    EmptyBatch,
    /// Transaction id or key absent.
    NotFound,
    /// A reference or ZAdd cannot resolve its target.
    ReferenceUnresolved,
    /// Durability or integrity problem in the storage layer.
    StorageFailure,
    /// Invariant violation.
    Internal,
}

/// Top-level error type for store operations.
///
/// # Recovery Guide
///
/// | Variant               | Retryable | Recovery Action                                  |
/// | --------------------- | --------- | ------------------------------------------------ |
/// | `IllegalArgument`     | No        | Fix the request parameters                       |
/// | `DuplicateKey`        | No        | Deduplicate keys within the batch                |
/// | `DuplicateZAdd`       | No        | Deduplicate `(set, key)` pairs within the batch  |
/// | `EmptyBatch`          | No        | Submit at least one operation                    |
/// | `TxNotFound`          | Yes       | The transaction may not be committed yet         |
/// | `KeyNotFound`         | No        | Expected for first reads                         |
/// | `ReferenceUnresolved` | No        | Fix the reference target or its pinned tx        |
/// | `Storage`             | Maybe     | Check disk health; reopen if the store failed    |
/// | `Corrupted`           | No        | Restore from backup                              |
/// | `Internal`            | No        | Report as issue with context                     |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Malformed argument: empty key, non-finite score, oversize value,
    /// unset or unknown operation variant.
    #[snafu(display("Illegal argument: {message}"))]
    IllegalArgument {
        /// Error description.
        message: String,
    },

    /// Two writes in the same batch target the same key.
    #[snafu(display("Duplicated key in batch: {}", String::from_utf8_lossy(key)))]
    DuplicateKey {
        /// The repeated key.
        key: Vec<u8>,
    },

    /// Two ZAdd operations in the same batch target the same `(set, key)`.
    #[snafu(display(
        "Duplicated ZAdd in batch: set={}, key={}",
        String::from_utf8_lossy(set),
        String::from_utf8_lossy(key)
    ))]
    DuplicateZAdd {
        /// Sorted set name.
        set: Vec<u8>,
        /// Member key.
        key: Vec<u8>,
    },

    /// The batch contained no operations.
    #[snafu(display("Empty batch"))]
    EmptyBatch,

    /// The transaction id does not exist.
    #[snafu(display("Transaction {tx_id} not found"))]
    TxNotFound {
        /// Requested transaction id.
        tx_id: TxId,
    },

    /// The key has no value at the requested point in history.
    #[snafu(display("Key not found: {}", String::from_utf8_lossy(key)))]
    KeyNotFound {
        /// Requested key.
        key: Vec<u8>,
    },

    /// A reference or ZAdd target cannot be resolved.
    #[snafu(display(
        "Unresolved reference to {} at tx {at_tx}",
        String::from_utf8_lossy(key)
    ))]
    ReferenceUnresolved {
        /// Target key.
        key: Vec<u8>,
        /// Pinned transaction, or 0 for in-batch resolution.
        at_tx: TxId,
    },

    /// Storage layer failure; nothing was committed.
    #[snafu(display("Storage error at {location}: {message}"))]
    Storage {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Persisted data failed an integrity check.
    #[snafu(display("Data corruption detected: {message}"))]
    Corrupted {
        /// Error description.
        message: String,
    },

    /// Internal error (unexpected state, invariant violation).
    #[snafu(display("Internal error at {location}: {message}"))]
    Internal {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl StoreError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IllegalArgument { .. } => ErrorCode::IllegalArgument,
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::DuplicateZAdd { .. } => ErrorCode::DuplicateZAdd,
            Self::EmptyBatch => ErrorCode::EmptyBatch,
            Self::TxNotFound { .. } => ErrorCode::TxNotFound,
            Self::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            Self::ReferenceUnresolved { .. } => ErrorCode::ReferenceUnresolved,
            Self::Storage { .. } => ErrorCode::StorageFailure,
            Self::Corrupted { .. } => ErrorCode::StorageCorruption,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalArgument { .. } => ErrorKind::IllegalArgument,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::DuplicateZAdd { .. } => ErrorKind::DuplicateIndexEntry,
            Self::EmptyBatch => ErrorKind::EmptyBatch,
            Self::TxNotFound { .. } | Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::ReferenceUnresolved { .. } => ErrorKind::ReferenceUnresolved,
            Self::Storage { .. } | Self::Corrupted { .. } => ErrorKind::StorageFailure,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error is retryable.
    ///
    /// Delegates to [`ErrorCode::is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Suggested recovery action for this error.
    #[must_use]
    pub const fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }

    /// Whether this error is a validation failure detected before any append.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        let code = self.code().as_u16();
        code >= 3000 && code < 3200
    }
}

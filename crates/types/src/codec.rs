//! Centralized serialization and deserialization functions.
//!
//! Persisted transaction records and transported operations use postcard.
//! Digest inputs never go through here; see [`crate::encoding`].

use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        encoding::{plain_key, plain_value},
        hash::{EMPTY_HASH, sha256},
        types::{KeyValue, Operation, Transaction, TxEntry, TxHeader, ZAddRequest},
    };

    fn sample_tx() -> Transaction {
        Transaction {
            header: TxHeader {
                version: 1,
                id: 42,
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                nentries: 2,
                entry_hash: sha256(b"entries"),
                root_hash: EMPTY_HASH,
            },
            entries: vec![
                TxEntry { key: plain_key(b"a"), value: plain_value(b"1") },
                TxEntry { key: plain_key(b"b"), value: vec![] },
            ],
        }
    }

    #[test]
    fn test_transaction_record_survives_codec() {
        let tx = sample_tx();
        let bytes = encode(&tx).expect("encode tx");
        let decoded: Transaction = decode(&bytes).expect("decode tx");
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode(&sample_tx()).unwrap();
        let b = encode(&sample_tx()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_operations_survive_codec() {
        let ops = vec![
            Operation::Kv(KeyValue::new("k", "v")),
            Operation::ZAdd(ZAddRequest::new("set", -2.5, "k", 7)),
        ];
        let bytes = encode(&ops).unwrap();
        let decoded: Vec<Operation> = decode(&bytes).unwrap();
        assert_eq!(ops, decoded);
    }

    #[test]
    fn test_decode_truncated_record_fails() {
        let bytes = encode(&sample_tx()).unwrap();
        let result: Result<Transaction, _> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn test_decode_empty_input_fails() {
        let result: Result<Transaction, _> = decode(&[]);
        assert!(result.unwrap_err().to_string().starts_with("Decoding failed"));
    }
}

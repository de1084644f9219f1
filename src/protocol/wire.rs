//! Deterministic binary serialization for protocol payloads.
//!
//! Payloads use bincode with a fixed configuration: fixed-size integer
//! encoding, little-endian byte order, trailing bytes rejected. Identical
//! inputs produce identical bytes on every platform, which the frame
//! checksum relies on.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

fn config() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize a value to bytes.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    config()
        .serialize(value)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a value from bytes.
///
/// Fails on malformed input, trailing bytes, or a type mismatch.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    config()
        .deserialize(bytes)
        .map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct TestStruct {
        a: u64,
        b: Vec<u32>,
        c: String,
    }

    #[test]
    fn test_roundtrip() {
        let original = TestStruct {
            a: 12345,
            b: vec![1, 2, 3],
            c: "hello".to_string(),
        };

        let bytes = serialize(&original).unwrap();
        let recovered: TestStruct = deserialize(&bytes).unwrap();

        assert_eq!(original, recovered);
    }

    #[test]
    fn test_determinism() {
        let value = TestStruct {
            a: 999,
            b: vec![7],
            c: "x".to_string(),
        };

        assert_eq!(serialize(&value).unwrap(), serialize(&value).unwrap());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = serialize(&42u64).unwrap();
        bytes.push(0xFF);

        let result: Result<u64, _> = deserialize(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_bytes() {
        let garbage = vec![0xFF, 0xFF, 0xFF];
        let result: Result<TestStruct, _> = deserialize(&garbage);
        assert!(result.is_err());
    }
}

//! Base64 helpers for binary fields carried inside JSON frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}

/// Serde adapter: `Vec<u8>` as a base64 string, `null` as empty.
///
/// This is the JSON shape Go gives `[]byte` fields, which the existing wire
/// corpus depends on.
pub mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(de)? {
            None => Ok(Vec::new()),
            Some(s) => super::decode(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let bytes = b"\x00\x01\x02hello world\xff";
        assert_eq!(decode(&encode(bytes)).unwrap(), bytes);
    }
}

use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// The pluggable codec that turns domain values into frame bodies.
///
/// A closed enum rather than a trait object so channels stay `Copy`-cheap to
/// configure; the rest of the system only ever calls `encode` and `decode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Serializer {
    #[default]
    Json,
}

impl Serializer {
    /// Resolves a serializer from its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> io::Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(value).map_err(io::Error::from),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> io::Result<T> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(io::Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_names() {
        assert_eq!(Serializer::from_name("json"), Some(Serializer::Json));
        assert_eq!(Serializer::from_name("protobuf"), None);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Serializer::Json.decode::<u32>(b"not json").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

//! Entity payload codecs.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Translates between an entity and the bytes stored in a hash field.
pub trait EntityCodec<V>: Send + Sync + 'static {
    fn encode(&self, entity: &V) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// JSON codec for any serde entity.
pub struct JsonCodec<V>(PhantomData<fn() -> V>);

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntityCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, entity: &V) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(entity)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codec assembled from a pair of functions.
pub struct FnCodec<E, D> {
    encode: E,
    decode: D,
}

impl<E, D> FnCodec<E, D> {
    pub fn new(encode: E, decode: D) -> Self {
        Self { encode, decode }
    }
}

impl<V, E, D> EntityCodec<V> for FnCodec<E, D>
where
    E: Fn(&V) -> Result<Vec<u8>, CodecError> + Send + Sync + 'static,
    D: Fn(&[u8]) -> Result<V, CodecError> + Send + Sync + 'static,
{
    fn encode(&self, entity: &V) -> Result<Vec<u8>, CodecError> {
        (self.encode)(entity)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        (self.decode)(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Role {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::<Role>::new();
        let result = codec.decode(b"[\"null\"]");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn test_fn_codec() {
        let codec: &dyn EntityCodec<String> = &FnCodec::new(
            |name: &String| -> Result<Vec<u8>, CodecError> { Ok(name.as_bytes().to_vec()) },
            |bytes: &[u8]| -> Result<String, CodecError> {
                String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Invalid(e.to_string()))
            },
        );

        let bytes = codec.encode(&"Admin".to_string()).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), "Admin");
        assert!(codec.decode(&[0xff, 0xfe]).is_err());
    }
}

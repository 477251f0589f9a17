//! Payload codecs.
//!
//! A log is parameterised by one [`Encoding`] that turns application values
//! into the opaque payload bytes carried by entries, and back.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Codec between application values and payload bytes.
pub trait Encoding: Send + Sync + 'static {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;
}

/// Identity codec for raw byte payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesEncoding;

impl Encoding for BytesEncoding {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringEncoding;

impl Encoding for StringEncoding {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Encoding(e.to_string()))
    }
}

/// JSON via serde for any serializable value type.
pub struct JsonEncoding<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonEncoding<T> {
    pub fn new() -> Self {
        JsonEncoding {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonEncoding<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonEncoding<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonEncoding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonEncoding")
    }
}

impl<T> Encoding for JsonEncoding<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Operation {
        Put { key: String, value: i64 },
        Delete { key: String },
    }

    #[test]
    fn test_string_encoding() {
        let encoding = StringEncoding;
        let bytes = encoding.encode(&"hello".to_string()).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(encoding.decode(&bytes).unwrap(), "hello");
    }

    #[test]
    fn test_invalid_utf8_is_encoding_error() {
        let err = StringEncoding.decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_json_encoding_of_sum_type() {
        let encoding = JsonEncoding::<Operation>::new();
        let op = Operation::Put {
            key: "a".into(),
            value: 3,
        };
        let bytes = encoding.encode(&op).unwrap();
        assert_eq!(encoding.decode(&bytes).unwrap(), op);

        let delete = Operation::Delete { key: "a".into() };
        let bytes = encoding.encode(&delete).unwrap();
        assert_eq!(encoding.decode(&bytes).unwrap(), delete);

        let err = encoding.decode(b"{not json").unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }
}

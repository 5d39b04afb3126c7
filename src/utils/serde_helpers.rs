use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize bytes as a standard base64 string
pub fn as_base64<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&STANDARD.encode(bytes))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytesRepr {
    Text(String),
    Array(Vec<u8>),
}

/// Deserialize bytes from a base64 string or from a JSON array of numbers
pub fn from_base64<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    match BytesRepr::deserialize(d)? {
        BytesRepr::Text(s) => STANDARD.decode(s.as_bytes()).map_err(D::Error::custom),
        BytesRepr::Array(v) => Ok(v),
    }
}

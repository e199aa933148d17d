//! Record codecs - application value <-> storable column value
//!
//! The durable store never sees application types directly. Every value
//! passes through a [`Codec`] on its way into the `value` column and again
//! when a row is read back or tested by a SQL callback.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Codec failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("cannot encode value: {0}")]
    Encode(String),

    #[error("corrupt stored value: {0}")]
    Decode(String),
}

/// Storable representation of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored {
    Text(String),
    Blob(Vec<u8>),
}

impl Stored {
    /// Raw bytes regardless of storage class
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Stored::Text(s) => s.as_bytes(),
            Stored::Blob(b) => b,
        }
    }
}

impl ToSql for Stored {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Stored::Text(s) => ToSqlOutput::from(s.as_str()),
            Stored::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

impl FromSql for Stored {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(t) => std::str::from_utf8(t)
                .map(|s| Stored::Text(s.to_owned()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(b) => Ok(Stored::Blob(b.to_vec())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Encode/decode pair for one value type.
///
/// Implementations must satisfy `decode(encode(v)) == v` for every legal `v`.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Stored, CodecError>;

    fn decode(&self, raw: Stored) -> Result<T, CodecError>;

    /// Declared SQL type of the value column
    fn column_type(&self) -> &'static str {
        "BLOB"
    }
}

/// Default codec: serde_json text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Stored, CodecError> {
        serde_json::to_string(value)
            .map(Stored::Text)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, raw: Stored) -> Result<T, CodecError> {
        serde_json::from_slice(raw.as_bytes()).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn column_type(&self) -> &'static str {
        "TEXT"
    }
}

type EncodeFn<T> = Box<dyn Fn(&T) -> Result<Stored, CodecError> + Send + Sync>;
type DecodeFn<T> = Box<dyn Fn(Stored) -> Result<T, CodecError> + Send + Sync>;

/// Codec assembled from a pair of closures
pub struct FnCodec<T> {
    encode: EncodeFn<T>,
    decode: DecodeFn<T>,
    column_type: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FnCodec<T> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> Result<Stored, CodecError> + Send + Sync + 'static,
        D: Fn(Stored) -> Result<T, CodecError> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
            column_type: "BLOB",
            _marker: PhantomData,
        }
    }

    /// Override the declared column type (defaults to BLOB)
    pub fn with_column_type(mut self, column_type: &'static str) -> Self {
        self.column_type = column_type;
        self
    }
}

impl<T: 'static> Codec<T> for FnCodec<T> {
    fn encode(&self, value: &T) -> Result<Stored, CodecError> {
        (self.encode)(value)
    }

    fn decode(&self, raw: Stored) -> Result<T, CodecError> {
        (self.decode)(raw)
    }

    fn column_type(&self) -> &'static str {
        self.column_type
    }
}

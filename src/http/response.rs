//! Response envelope codec.
//!
//! Every downstream answers with the same JSON envelope:
//!
//! ```text
//! { "error_code": <int>, "error_note": <string>, "data": <any JSON> }
//! ```
//!
//! `error_code == 0` means success. The payload is kept as raw JSON until the
//! caller asks for a concrete type, so decoding it twice gives the same result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::http::error::RemoteError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_note: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// Outcome of an envelope, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Success(T),
    /// The downstream answered but declared an error.
    Declined { code: i64, note: String },
}

impl ResponseEnvelope {
    /// A success envelope carrying `data`.
    pub fn ok<T: Serialize + ?Sized>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            error_code: 0,
            error_note: String::new(),
            data: Some(serde_json::value::to_raw_value(data)?),
        })
    }

    /// An error envelope with no payload.
    pub fn error(code: i64, note: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_note: note.into(),
            data: None,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, RemoteError> {
        serde_json::from_slice(bytes).map_err(RemoteError::UnexpectedResponseData)
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    /// The undecoded payload, if the downstream sent one.
    pub fn raw_data(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }

    /// Deserialize the payload. An absent payload decodes as JSON `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_str(self.raw_data().unwrap_or("null")).map_err(RemoteError::UnexpectedResponseData)
    }

    /// Branch on the error code, decoding the payload only on success.
    pub fn into_reply<T: DeserializeOwned>(self) -> Result<Reply<T>, RemoteError> {
        if self.is_success() {
            self.decode().map(Reply::Success)
        } else {
            Ok(Reply::Declined {
                code: self.error_code,
                note: self.error_note,
            })
        }
    }
}

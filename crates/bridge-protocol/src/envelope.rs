use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used when an error envelope arrives without one.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error from Blender";

/// Uniform success/error wrapper around a command's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope {
    /// The handler completed and produced `result`.
    Success {
        /// Handler return value.
        #[serde(default = "empty_object")]
        result: Value,
    },
    /// The command failed on the host.
    Error {
        /// Human-readable cause.
        #[serde(default = "default_message")]
        message: String,
    },
}

impl Envelope {
    /// Wraps a handler return value.
    #[must_use]
    pub const fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Wraps a failure message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Reads a reply leniently.
    ///
    /// Only `"status": "error"` marks a failure. Any other or missing status
    /// is treated as success, with `result` defaulting to an empty object.
    ///
    /// # Errors
    ///
    /// Returns an error when `reply` is not a JSON object.
    pub fn from_reply(reply: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(mut fields) = reply else {
            return Err(serde_json::Error::custom("response is not a JSON object"));
        };
        if fields.get("status").and_then(Value::as_str) == Some("error") {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(default_message, str::to_owned);
            return Ok(Self::Error { message });
        }
        Ok(Self::Success {
            result: fields.remove("result").unwrap_or_else(empty_object),
        })
    }

    /// Reports whether the envelope carries a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Converts the envelope into the result or the remote error message.
    ///
    /// # Errors
    ///
    /// Returns the carried message for [`Envelope::Error`].
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Error { message } => Err(message),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_message() -> String {
    DEFAULT_ERROR_MESSAGE.to_owned()
}

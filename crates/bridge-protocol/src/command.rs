use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named arguments of a command.
pub type Params = Map<String, Value>;

/// A typed request sent from the client to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Selects the handler on the host.
    #[serde(rename = "type")]
    pub command_type: String,
    /// Handler-specific arguments; absent or `null` decodes as empty.
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Params,
}

impl Command {
    /// Builds a command with the given parameters.
    #[must_use]
    pub fn new(command_type: impl Into<String>, params: Params) -> Self {
        Self {
            command_type: command_type.into(),
            params,
        }
    }

    /// Builds a command without parameters.
    #[must_use]
    pub fn bare(command_type: impl Into<String>) -> Self {
        Self::new(command_type, Params::new())
    }

    /// Decodes a command from an already parsed frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the value is not a `{type, params}`
    /// object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

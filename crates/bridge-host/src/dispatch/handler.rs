use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bridge_protocol::Params;

use super::errors::HandlerError;

/// Shared callable bound to one command type.
pub type Handler = Arc<dyn Fn(&Params) -> Result<Value, HandlerError> + Send + Sync>;

/// Argument type for commands that take no parameters.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

/// Adapts a typed closure into a [`Handler`].
///
/// The `params` object is deserialised into `P`; a mismatch (missing key,
/// wrong type, or an unknown key when `P` denies them) is reported as
/// [`HandlerError::InvalidParams`]. The closure's return value is serialised
/// back into JSON.
pub fn handler_fn<P, R, F>(handler: F) -> Handler
where
    P: DeserializeOwned,
    R: Serialize,
    F: Fn(P) -> Result<R, HandlerError> + Send + Sync + 'static,
{
    Arc::new(move |params: &Params| {
        let arguments = P::deserialize(Value::Object(params.clone()))
            .map_err(|error| HandlerError::InvalidParams(error.to_string()))?;
        let output = handler(arguments)?;
        serde_json::to_value(output).map_err(|error| HandlerError::failed(error.to_string()))
    })
}

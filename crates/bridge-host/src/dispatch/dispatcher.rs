use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use bridge_config::FeatureFlags;
use bridge_protocol::{Command, Envelope};

use super::errors::HandlerError;
use super::registry::HandlerRegistry;
use super::DISPATCH_TARGET;

/// Routes commands to handlers and shapes the outcome into an envelope.
///
/// Cloning is cheap; clones share the registry and the feature switches.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    flags: FeatureFlags,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`, gated by `flags`.
    #[must_use]
    pub fn new(registry: HandlerRegistry, flags: FeatureFlags) -> Self {
        Self {
            registry: Arc::new(registry),
            flags,
        }
    }

    /// Feature switches consulted on every dispatch.
    #[must_use]
    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Command types available under the current feature switches.
    #[must_use]
    pub fn available_commands(&self) -> Vec<String> {
        self.registry
            .table(&self.flags)
            .names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Decodes a frame into a command and dispatches it.
    ///
    /// A frame that is valid JSON but not a `{type, params}` object yields an
    /// error envelope rather than being dropped.
    #[must_use]
    pub fn dispatch_value(&self, frame: Value) -> Envelope {
        match Command::from_value(frame) {
            Ok(command) => self.dispatch(&command),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "frame is not a command");
                Envelope::error(format!("Invalid command: {error}"))
            }
        }
    }

    /// Runs the handler registered for `command` and wraps its result.
    #[must_use]
    pub fn dispatch(&self, command: &Command) -> Envelope {
        let table = self.registry.table(&self.flags);
        let Some(handler) = table.get(&command.command_type) else {
            warn!(
                target: DISPATCH_TARGET,
                command = %command.command_type,
                "unknown command type"
            );
            return Envelope::error(format!("Unknown command type: {}", command.command_type));
        };

        debug!(
            target: DISPATCH_TARGET,
            command = %command.command_type,
            "executing handler"
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&command.params)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))));

        match outcome {
            Ok(result) => {
                debug!(
                    target: DISPATCH_TARGET,
                    command = %command.command_type,
                    "handler execution complete"
                );
                Envelope::success(result)
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    command = %command.command_type,
                    %error,
                    "handler failed"
                );
                Envelope::error(error.to_string())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

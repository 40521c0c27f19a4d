//! Command dispatch for the host.
//!
//! A [`Dispatcher`] maps a command's `type` onto a registered [`Handler`] and
//! packages the outcome as an [`Envelope`](bridge_protocol::Envelope). The
//! handler table is rebuilt from the [`HandlerRegistry`] on every dispatch so
//! that feature switches flipped mid-session apply to the next command.
//!
//! Handlers receive the command's `params` object. Typed handlers built with
//! [`handler_fn`] deserialise it into a struct, so each key acts as a named
//! argument and unknown keys are rejected.

mod dispatcher;
mod errors;
mod handler;
mod registry;

pub use self::dispatcher::Dispatcher;
pub use self::errors::HandlerError;
pub use self::handler::{Handler, NoParams, handler_fn};
pub use self::registry::{HandlerGroup, HandlerRegistry, HandlerTable};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

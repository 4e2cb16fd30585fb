//! Callbacks that streaming searches deliver messages to.
//!
//! A failing consumer never stops the read loop: its error goes to the
//! error consumer, and a failing error consumer is only logged.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

/// Receives one kind of message. Calls for one search never overlap.
pub type Consumer<T> = Box<dyn FnMut(T) -> anyhow::Result<()> + Send>;

pub type ErrorConsumer = Consumer<anyhow::Error>;

/// Run a consumer, turning a panic into an error.
fn call<T>(consumer: &mut Consumer<T>, value: T) -> anyhow::Result<()> {
    match catch_unwind(AssertUnwindSafe(|| consumer(value))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string payload"
    }
}

/// Pass `error` to the error consumer, if any.
pub(crate) fn report(on_error: &mut Option<ErrorConsumer>, error: anyhow::Error) {
    warn!("{:#}", error);
    if let Some(handler) = on_error.as_mut() {
        if let Err(e) = call(handler, error) {
            error!("Error consumer failed: {:#}", e);
        }
    }
}

/// Call `consumer` with `value` and route a failure or panic to the error consumer.
pub(crate) fn deliver<T>(consumer: &mut Option<Consumer<T>>, value: T, on_error: &mut Option<ErrorConsumer>, what: &str) {
    if let Some(consumer) = consumer.as_mut() {
        if let Err(e) = call(consumer, value) {
            report(on_error, e.context(format!("{} consumer failed", what)));
        }
    }
}

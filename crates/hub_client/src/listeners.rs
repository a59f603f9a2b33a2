//! Local listeners for updates and client errors.

use crate::error::ClientError;
use common::{Update, UpdateType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Callback invoked with each received update.
pub type UpdateListener = Arc<dyn Fn(&Update) + Send + Sync>;

/// Callback invoked with non-fatal and terminal client errors.
pub type ErrorListener = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Registered listeners.
///
/// Listener lists are cloned out of their locks before callbacks run, so a
/// callback may register further listeners.
#[derive(Default)]
pub struct Listeners {
    any: RwLock<Vec<UpdateListener>>,
    by_type: RwLock<HashMap<UpdateType, Vec<UpdateListener>>>,
    errors: RwLock<Vec<ErrorListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_any(&self, listener: UpdateListener) {
        self.any
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_for_type(&self, update_type: UpdateType, listener: UpdateListener) {
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(update_type)
            .or_default()
            .push(listener);
    }

    pub fn add_error(&self, listener: ErrorListener) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Parse a received frame and deliver it.
    ///
    /// A frame that is not an update is reported to error listeners.
    pub fn dispatch_raw(&self, raw: &str) {
        match Update::from_json(raw) {
            Ok(update) => self.dispatch(&update),
            Err(e) => {
                debug!("Dropping unparseable frame: {}", e);
                self.emit_error(&ClientError::Protocol(e));
            }
        }
    }

    /// Deliver an update to catch-all listeners, then to its type's listeners.
    pub fn dispatch(&self, update: &Update) {
        let any = self
            .any
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let typed = self
            .by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&update.update_type)
            .cloned()
            .unwrap_or_default();

        for listener in any.iter().chain(typed.iter()) {
            listener(update);
        }
    }

    pub fn emit_error(&self, error: &ClientError) {
        let listeners = self
            .errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(error);
        }
    }
}

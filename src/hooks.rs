//! Global handling of dropped signals
//!
//! Once a subscription is terminated, the protocol forbids delivering anything
//! else downstream. Items and errors that still show up, and listener faults
//! raised after termination, are handed to the hooks configured here. Without
//! a configured hook they are logged.
//!
//! ```rust
//! use rxtap::hooks::Hooks;
//!
//! Hooks::on_error_dropped(|err| eprintln!("dropped: {err:?}"));
//! Hooks::reset_on_error_dropped();
//! ```

use std::{any::Any, fmt::Debug, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

type ErrorDroppedHook = Arc<dyn Fn(&dyn Debug) + Send + Sync>;
type NextDroppedHook = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Process-wide dropped-signal hooks.
#[derive(Clone, Default)]
pub struct Hooks {
  on_error_dropped: Option<ErrorDroppedHook>,
  on_next_dropped: Option<NextDroppedHook>,
}

static HOOKS: Lazy<RwLock<Hooks>> = Lazy::new(Default::default);

impl Hooks {
  /// Replaces the hook receiving errors that cannot be delivered anymore.
  pub fn on_error_dropped<F>(hook: F)
  where
    F: Fn(&dyn Debug) + Send + Sync + 'static,
  {
    HOOKS.write().on_error_dropped = Some(Arc::new(hook));
  }

  /// Replaces the hook receiving items that cannot be delivered anymore.
  pub fn on_next_dropped<F>(hook: F)
  where
    F: Fn(&dyn Any) + Send + Sync + 'static,
  {
    HOOKS.write().on_next_dropped = Some(Arc::new(hook));
  }

  pub fn reset_on_error_dropped() { HOOKS.write().on_error_dropped = None; }

  pub fn reset_on_next_dropped() { HOOKS.write().on_next_dropped = None; }

  /// Restores the logging defaults for every hook.
  pub fn reset() { *HOOKS.write() = Hooks::default(); }
}

/// Hands an undeliverable error to the configured hook.
pub(crate) fn error_dropped(error: &dyn Debug) {
  // cloned so a hook may reconfigure the hooks without deadlocking
  let hook = HOOKS.read().on_error_dropped.clone();
  match hook {
    Some(hook) => hook(error),
    None => log::warn!("error dropped after termination: {error:?}"),
  }
}

/// Hands an undeliverable item to the configured hook.
pub(crate) fn next_dropped<T: Any>(item: &T) {
  let hook = HOOKS.read().on_next_dropped.clone();
  match hook {
    Some(hook) => hook(item),
    None => log::debug!("item of type {} dropped after termination", std::any::type_name::<T>()),
  }
}

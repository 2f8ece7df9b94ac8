//! Ambient scope installation
//!
//! A [`ScopeManager`] installs the ambient values derived from a [`Context`]
//! for the duration of a call. The returned [`ScopeGuard`] restores whatever
//! was installed before, when it is dropped: on normal return, on early
//! return and while unwinding.
//!
//! ```rust
//! use rxtap::{
//!   context::Context,
//!   scope::{current_context, ScopeManager, ThreadLocalScope},
//! };
//!
//! let scope = ThreadLocalScope::all();
//! assert!(current_context().is_empty());
//! {
//!   let _guard = scope.install(&Context::of("trace_id", 7_u64));
//!   assert_eq!(current_context().get::<u64>("trace_id"), Some(&7));
//! }
//! assert!(current_context().is_empty());
//! ```

use std::cell::RefCell;

use crate::context::{Context, ContextKey};

/// Installs ambient state derived from a context snapshot.
pub trait ScopeManager: Send + Sync {
  /// Installs the values of `context` and returns the guard restoring the
  /// previous state.
  fn install(&self, context: &Context) -> ScopeGuard;
}

/// RAII handle of an installed scope. Dropping it restores the previous
/// ambient state.
#[must_use]
pub struct ScopeGuard {
  restore: Option<Box<dyn FnOnce()>>,
}

impl ScopeGuard {
  /// A guard running `restore` when dropped.
  pub fn new(restore: impl FnOnce() + 'static) -> Self { ScopeGuard { restore: Some(Box::new(restore)) } }

  /// A guard with nothing to restore.
  pub fn noop() -> Self { ScopeGuard { restore: None } }
}

impl Drop for ScopeGuard {
  #[inline]
  fn drop(&mut self) {
    if let Some(restore) = self.restore.take() {
      restore()
    }
  }
}

thread_local! {
  static CURRENT: RefCell<Context> = RefCell::new(Context::empty());
}

/// The ambient context installed on the current thread by
/// [`ThreadLocalScope`].
pub fn current_context() -> Context {
  CURRENT
    .try_with(|c| c.borrow().clone())
    .unwrap_or_default()
}

/// Installs context values as the thread-local [`current_context`].
#[derive(Clone, Debug, Default)]
pub struct ThreadLocalScope {
  keys: Option<Vec<ContextKey>>,
}

impl ThreadLocalScope {
  /// Installs every entry of the context.
  pub fn all() -> Self { Self::default() }

  /// Installs only the registered keys; other entries stay invisible to the
  /// ambient lookup.
  pub fn keys<K: Into<ContextKey>>(keys: impl IntoIterator<Item = K>) -> Self {
    ThreadLocalScope { keys: Some(keys.into_iter().map(Into::into).collect()) }
  }

  fn derive(&self, context: &Context) -> Context {
    match &self.keys {
      Some(keys) => context.retain_keys(keys.iter().map(|k| &**k)),
      None => context.clone(),
    }
  }
}

impl ScopeManager for ThreadLocalScope {
  fn install(&self, context: &Context) -> ScopeGuard {
    let installed = self.derive(context);
    match CURRENT.try_with(|c| c.replace(installed)) {
      Ok(previous) => ScopeGuard::new(move || {
        let _ = CURRENT.try_with(|c| c.replace(previous));
      }),
      Err(_) => ScopeGuard::noop(),
    }
  }
}

/// Installs nothing. Tapping with this manager leaves ambient state alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScope;

impl ScopeManager for NoopScope {
  #[inline]
  fn install(&self, _: &Context) -> ScopeGuard { ScopeGuard::noop() }
}

//! Error types raised while tapping a stream.
//!
//! - [`ListenerError`]: a fault of the signal listener itself (construction,
//!   a hook, or context augmentation).
//! - [`TapError`]: what the downstream subscriber of a tap receives: either
//!   the untouched upstream error, a listener fault, or both combined.
//! - [`ProtocolViolation`]: misuse of the flow-control protocol, which is
//!   never surfaced downstream and only reported to the dropped-error hook.

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error returned by listener hooks and factories.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A failure raised by a signal listener or its factory.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ListenerError {
  /// The factory could not create a listener for a new subscription.
  #[error("unable to create signal listener: {0}")]
  Creation(#[source] BoxError),

  /// A lifecycle hook failed.
  #[error("signal listener hook `{hook}` failed: {source}")]
  Hook {
    /// Name of the hook that failed, e.g. `do_on_next`.
    hook: &'static str,
    /// The error returned by the hook.
    #[source]
    source: BoxError,
  },

  /// `add_to_context` failed while the subscription was being assembled.
  #[error("unable to augment tap context at subscription via add_to_context: {0}")]
  ContextAugmentation(#[source] BoxError),
}

impl ListenerError {
  pub(crate) fn hook(hook: &'static str, source: BoxError) -> Self {
    ListenerError::Hook { hook, source }
  }

  /// Returns a short stable label (snake_case) for use in logs/metrics.
  ///
  /// # Example
  /// ```
  /// use rxtap::error::ListenerError;
  ///
  /// let err = ListenerError::Creation("boom".into());
  /// assert_eq!(err.as_label(), "listener_creation");
  /// ```
  pub fn as_label(&self) -> &'static str {
    match self {
      ListenerError::Creation(_) => "listener_creation",
      ListenerError::Hook { .. } => "listener_hook",
      ListenerError::ContextAugmentation(_) => "listener_context_augmentation",
    }
  }

  /// Name of the failed hook, if the error comes from one.
  pub fn hook_name(&self) -> Option<&'static str> {
    match self {
      ListenerError::Hook { hook, .. } => Some(*hook),
      _ => None,
    }
  }

  /// The error originally raised by the listener code.
  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    match self {
      ListenerError::Creation(e)
      | ListenerError::Hook { source: e, .. }
      | ListenerError::ContextAugmentation(e) => e.as_ref(),
    }
  }
}

/// The error type seen by the downstream subscriber of a tap.
#[derive(Error, Debug)]
pub enum TapError<E> {
  /// The upstream error, forwarded unchanged.
  #[error("{0:?}")]
  Source(E),

  /// A listener fault terminated the sequence.
  #[error(transparent)]
  Listener(ListenerError),

  /// `do_on_error` failed while the upstream error was being processed.
  #[error("multiple errors: {listener}; original error: {original:?}")]
  Multiple {
    /// The fault raised by the listener.
    listener: ListenerError,
    /// The upstream error that was being delivered.
    original: E,
  },
}

impl<E> TapError<E> {
  /// `true` when the listener, not the upstream, caused the termination.
  pub fn is_listener_fault(&self) -> bool { !matches!(self, TapError::Source(_)) }

  /// The listener fault carried by this error, if any.
  pub fn listener_error(&self) -> Option<&ListenerError> {
    match self {
      TapError::Source(_) => None,
      TapError::Listener(e) | TapError::Multiple { listener: e, .. } => Some(e),
    }
  }

  /// The upstream error carried by this error, if any.
  pub fn source_error(&self) -> Option<&E> {
    match self {
      TapError::Source(e) | TapError::Multiple { original: e, .. } => Some(e),
      TapError::Listener(_) => None,
    }
  }

  /// Consumes the error and returns the upstream error, if any.
  pub fn into_source(self) -> Option<E> {
    match self {
      TapError::Source(e) | TapError::Multiple { original: e, .. } => Some(e),
      TapError::Listener(_) => None,
    }
  }
}

/// Violations of the flow-control protocol detected at the tap boundary.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
  /// `request(0)` was issued; demand must be strictly positive.
  #[error("request must be positive, got {0}")]
  NonPositiveRequest(u64),

  /// `on_subscribe` was invoked while a subscription was already set.
  #[error("subscription already set")]
  DuplicateSubscription,
}

//! Signal listeners: per-subscription side effects
//!
//! A [`SignalListener`] is notified of every lifecycle event of one
//! subscription. It is created by a [`SignalListenerFactory`] when the
//! subscription starts, owned by the tap for the lifetime of the
//! subscription, and never reused.
//!
//! Every hook may fail by returning an error. The tap contains such failures:
//! the listener is told about them through
//! [`SignalListener::handle_listener_error`], and the downstream subscriber
//! never receives more than one terminal signal. See [`crate::ops::tap`] for
//! the exact policy.

use std::{
  fmt::{Display, Formatter},
  marker::PhantomData,
};

use crate::{
  context::Context,
  error::{BoxError, ListenerError},
  publisher::Publisher,
};

/// Result of a listener hook.
pub type HookResult = Result<(), BoxError>;

/// How a subscription ended, passed to [`SignalListener::do_finally`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalType {
  /// The upstream completed.
  Complete,
  /// The upstream failed.
  Error,
  /// The downstream cancelled.
  Cancel,
}

impl SignalType {
  /// Returns a short stable label (snake_case) for use in logs/metrics.
  pub fn as_label(&self) -> &'static str {
    match self {
      SignalType::Complete => "on_complete",
      SignalType::Error => "on_error",
      SignalType::Cancel => "cancel",
    }
  }
}

impl Display for SignalType {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_label()) }
}

/// Side-effecting hooks around the signals of one subscription.
///
/// Every hook defaults to a no-op, implement the ones you care about.
///
/// Hooks observe the signal, they never change it: items and errors are
/// passed by reference and forwarded downstream untouched.
pub trait SignalListener<T, E>: Send {
  /// Before the tap subscribes to its source.
  fn do_first(&mut self) -> HookResult { Ok(()) }

  /// When the upstream subscription is received, before it is passed
  /// downstream.
  fn do_on_subscription(&mut self) -> HookResult { Ok(()) }

  /// Before an item is passed downstream.
  fn do_on_next(&mut self, _value: &T) -> HookResult { Ok(()) }

  /// An item arrived after the sequence terminated. The item is dropped.
  fn do_on_malformed_on_next(&mut self, _value: &T) -> HookResult { Ok(()) }

  /// Before the upstream error is passed downstream.
  fn do_on_error(&mut self, _error: &E) -> HookResult { Ok(()) }

  /// An error arrived after the sequence terminated. The error is dropped.
  fn do_on_malformed_on_error(&mut self, _error: &E) -> HookResult { Ok(()) }

  /// After the upstream error was passed downstream.
  fn do_after_error(&mut self, _error: &E) -> HookResult { Ok(()) }

  /// Before the completion is passed downstream.
  fn do_on_complete(&mut self) -> HookResult { Ok(()) }

  /// A completion arrived after the sequence terminated.
  fn do_on_malformed_on_complete(&mut self) -> HookResult { Ok(()) }

  /// After the completion was passed downstream.
  fn do_after_complete(&mut self) -> HookResult { Ok(()) }

  /// Last hook of a subscription that ended without a listener fault.
  /// Invoked at most once.
  fn do_finally(&mut self, _signal: SignalType) -> HookResult { Ok(()) }

  /// Before a demand request is passed upstream.
  fn do_on_request(&mut self, _n: u64) -> HookResult { Ok(()) }

  /// Before a cancellation is passed upstream.
  fn do_on_cancel(&mut self) -> HookResult { Ok(()) }

  /// Augments the context of the subscription. Invoked once, right after
  /// [`SignalListener::do_first`]; the returned context is the one visible
  /// upstream and installed around every later signal.
  fn add_to_context(&mut self, context: Context) -> Result<Context, BoxError> { Ok(context) }

  /// Receives every fault raised by this listener's own hooks.
  ///
  /// Must not panic.
  fn handle_listener_error(&mut self, error: &ListenerError) {
    log::warn!("signal listener failed ({}): {error}", error.as_label());
  }
}

/// Creates one [`SignalListener`] per subscription.
pub trait SignalListenerFactory<T, E>: Send + Sync {
  /// State computed once per assembled tap and shared by every listener.
  type State: Send + Sync;

  type Listener: SignalListener<T, E>;

  /// Computes the shared state. Invoked once, when the tap is assembled.
  fn initialize_publisher_state(&self, source: &dyn Publisher<Item = T, Err = E>) -> Self::State;

  /// Creates the listener of a new subscription. `context` is the context of
  /// the subscriber, before any augmentation.
  fn create_listener(
    &self,
    source: &dyn Publisher<Item = T, Err = E>,
    context: &Context,
    state: &Self::State,
  ) -> Result<Self::Listener, BoxError>;
}

/// Factory creating each listener from the subscriber context with a closure.
/// The shared state is `()`.
pub struct FnListenerFactory<G> {
  create: G,
}

impl<G> FnListenerFactory<G> {
  pub fn new(create: G) -> Self { FnListenerFactory { create } }
}

impl<T, E, G, L> SignalListenerFactory<T, E> for FnListenerFactory<G>
where
  G: Fn(&Context) -> L + Send + Sync,
  L: SignalListener<T, E>,
{
  type State = ();
  type Listener = L;

  fn initialize_publisher_state(&self, _: &dyn Publisher<Item = T, Err = E>) {}

  fn create_listener(
    &self,
    _: &dyn Publisher<Item = T, Err = E>,
    context: &Context,
    _: &(),
  ) -> Result<L, BoxError> {
    Ok((self.create)(context))
  }
}

/// A listener ignoring every signal.
pub struct NoopListener<T, E>(PhantomData<fn(&T, &E)>);

impl<T, E> Default for NoopListener<T, E> {
  fn default() -> Self { NoopListener(PhantomData) }
}

impl<T, E> SignalListener<T, E> for NoopListener<T, E> {}

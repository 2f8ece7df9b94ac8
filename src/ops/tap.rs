//! Tap: per-subscription signal listeners
//!
//! [`Tap`] is assembled by [`PublisherExt::tap`](crate::publisher::PublisherExt::tap).
//! For every subscription it creates a [`SignalListener`], runs `do_first`,
//! lets the listener augment the subscriber context, and then subscribes a
//! [`TapSubscriber`] to the source. The tap subscriber forwards every signal
//! unchanged and runs the matching hook around it.
//!
//! Hook failures never break the protocol:
//!
//! | fault raised by | downstream receives | upstream |
//! |---|---|---|
//! | factory | `TapError::Listener(Creation)` | never subscribed |
//! | `do_first`, `add_to_context` | `TapError::Listener` | never subscribed |
//! | `do_on_subscription` | `TapError::Listener` | cancelled |
//! | `do_on_next`, `do_on_complete`, `do_on_request` | `TapError::Listener` | cancelled |
//! | `do_on_error` | `TapError::Multiple` | cancelled |
//! | `do_on_cancel` | `TapError::Listener` | left alone |
//! | `do_finally` after a cancel | `TapError::Listener` | already cancelled |
//! | after-terminal and malformed hooks | nothing, the fault is dropped | untouched |
//!
//! Each fault is handed to [`SignalListener::handle_listener_error`] first.
//! Dropped faults, dropped items and dropped errors then go to the global
//! [`hooks`](crate::hooks). `do_finally` runs at most once and never after a
//! fault terminated the subscription. A cancel lets go of the downstream, so
//! items still arriving afterwards are dropped.

use std::{
  fmt::Debug,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
  },
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  context::Context,
  error::{ListenerError, ProtocolViolation, TapError},
  hooks,
  listener::{HookResult, SignalListener, SignalListenerFactory, SignalType},
  publisher::Publisher,
  scope::{ScopeGuard, ScopeManager, ThreadLocalScope},
  subscriber::{error_to, ConditionalSubscriber, Subscriber},
  subscription::{validate_request, Subscription, SubscriptionRef},
};

// ============================================================================
// Tap Operator
// ============================================================================

pub struct Tap<P, F>
where
  P: Publisher,
  F: SignalListenerFactory<P::Item, P::Err>,
{
  source: P,
  factory: F,
  state: F::State,
  scope: Arc<dyn ScopeManager>,
}

impl<P, F> Tap<P, F>
where
  P: Publisher,
  F: SignalListenerFactory<P::Item, P::Err>,
{
  /// Assembles the tap, computing the factory state once.
  pub fn new(source: P, factory: F) -> Self {
    let state = factory.initialize_publisher_state(&source);
    Tap { source, factory, state, scope: Arc::new(ThreadLocalScope::all()) }
  }

  /// Replaces the scope manager installed around subscription and every
  /// signal. Defaults to [`ThreadLocalScope::all`].
  pub fn with_scope(mut self, scope: impl ScopeManager + 'static) -> Self {
    self.scope = Arc::new(scope);
    self
  }

  /// The state shared by every listener of this tap.
  pub fn state(&self) -> &F::State { &self.state }
}

impl<P, F> Publisher for Tap<P, F>
where
  P: Publisher,
  P::Item: Clone + Send + 'static,
  P::Err: Clone + Debug + Send + 'static,
  F: SignalListenerFactory<P::Item, P::Err>,
  F::Listener: 'static,
{
  type Item = P::Item;
  type Err = TapError<P::Err>;

  fn subscribe(&self, downstream: Arc<dyn Subscriber<P::Item, TapError<P::Err>>>) {
    let context = downstream.current_context();
    let mut listener = match self.factory.create_listener(&self.source, &context, &self.state) {
      Ok(listener) => listener,
      Err(e) => {
        let err = ListenerError::Creation(e);
        log::debug!("tap not subscribed: {err}");
        error_to(&*downstream, TapError::Listener(err));
        return;
      }
    };

    if let Err(e) = listener.do_first() {
      let err = ListenerError::hook("do_first", e);
      listener.handle_listener_error(&err);
      log::debug!("tap not subscribed: {err}");
      error_to(&*downstream, TapError::Listener(err));
      return;
    }

    let context = match listener.add_to_context(context) {
      Ok(context) => context,
      Err(e) => {
        let err = ListenerError::ContextAugmentation(e);
        listener.handle_listener_error(&err);
        log::debug!("tap not subscribed: {err}");
        error_to(&*downstream, TapError::Listener(err));
        return;
      }
    };

    let _scope = self.scope.install(&context);
    let subscriber = TapSubscriber::new(downstream, listener, context, self.scope.clone());
    self.source.subscribe(subscriber);
  }
}

// ============================================================================
// Tap Subscriber
// ============================================================================

struct Downstream<T, E> {
  plain: Arc<dyn Subscriber<T, TapError<E>>>,
  conditional: Option<Arc<dyn ConditionalSubscriber<T, TapError<E>>>>,
}

impl<T, E> Clone for Downstream<T, E> {
  fn clone(&self) -> Self { Downstream { plain: self.plain.clone(), conditional: self.conditional.clone() } }
}

/// The subscriber a [`Tap`] subscribes to its source, and the subscription
/// its downstream receives.
pub struct TapSubscriber<T, E, L> {
  me: Weak<Self>,
  // taken by the terminal signal
  downstream: Mutex<Option<Downstream<T, E>>>,
  listener: Mutex<L>,
  context: Context,
  scope: Arc<dyn ScopeManager>,
  upstream: OnceCell<SubscriptionRef>,
  done: AtomicBool,
  finalized: AtomicBool,
}

impl<T, E, L> TapSubscriber<T, E, L>
where
  T: Clone + Send + 'static,
  E: Clone + Debug + Send + 'static,
  L: SignalListener<T, E> + 'static,
{
  /// `context` is the augmented context: it is installed around every
  /// signal and reported upstream as this subscriber's context.
  pub fn new(
    downstream: Arc<dyn Subscriber<T, TapError<E>>>,
    listener: L,
    context: Context,
    scope: Arc<dyn ScopeManager>,
  ) -> Arc<Self> {
    let conditional = downstream.clone().as_conditional();
    Arc::new_cyclic(|me| TapSubscriber {
      me: me.clone(),
      downstream: Mutex::new(Some(Downstream { plain: downstream, conditional })),
      listener: Mutex::new(listener),
      context,
      scope,
      upstream: OnceCell::new(),
      done: AtomicBool::new(false),
      finalized: AtomicBool::new(false),
    })
  }

  /// `true` once a terminal signal was received, or a listener fault
  /// terminated the downstream.
  pub fn is_terminated(&self) -> bool { self.done.load(Ordering::Acquire) }

  fn enter(&self) -> ScopeGuard { self.scope.install(&self.context) }

  /// Runs one hook. The listener lock is released before returning.
  fn hook(&self, name: &'static str, f: impl FnOnce(&mut L) -> HookResult) -> Result<(), ListenerError> {
    let mut listener = self.listener.lock();
    f(&mut *listener).map_err(|e| ListenerError::hook(name, e))
  }

  fn report(&self, err: &ListenerError) { self.listener.lock().handle_listener_error(err); }

  fn downstream(&self) -> Option<Downstream<T, E>> { self.downstream.lock().clone() }

  fn cancel_upstream(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel()
    }
  }

  fn finally(&self, signal: SignalType) -> Result<(), ListenerError> {
    if self.finalized.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    self.hook("do_finally", |l| l.do_finally(signal))
  }

  /// Terminates the downstream with a listener fault. `do_finally` will not
  /// run anymore.
  fn terminate(&self, error: TapError<E>) {
    self.done.store(true, Ordering::Release);
    self.finalized.store(true, Ordering::Release);
    let downstream = self.downstream.lock().take();
    match downstream {
      Some(downstream) => downstream.plain.on_error(error),
      None => hooks::error_dropped(&error),
    }
  }

  fn fail(&self, err: ListenerError) {
    self.cancel_upstream();
    self.report(&err);
    self.terminate(TapError::Listener(err));
  }

  /// A fault raised once the downstream can no longer be told.
  fn drop_fault(&self, err: ListenerError) {
    self.report(&err);
    hooks::error_dropped(&err);
  }

  fn malformed_next(&self, item: T) {
    if let Err(err) = self.hook("do_on_malformed_on_next", |l| l.do_on_malformed_on_next(&item)) {
      self.drop_fault(err);
    }
    hooks::next_dropped(&item);
  }
}

impl<T, E, L> Subscriber<T, E> for TapSubscriber<T, E, L>
where
  T: Clone + Send + 'static,
  E: Clone + Debug + Send + 'static,
  L: SignalListener<T, E> + 'static,
{
  fn on_subscribe(&self, subscription: SubscriptionRef) {
    let _scope = self.enter();
    if self.upstream.set(subscription.clone()).is_err() {
      subscription.cancel();
      log::debug!("tap ignored on_subscribe: {}", ProtocolViolation::DuplicateSubscription);
      return;
    }

    if let Err(err) = self.hook("do_on_subscription", L::do_on_subscription) {
      subscription.cancel();
      self.report(&err);
      self.done.store(true, Ordering::Release);
      self.finalized.store(true, Ordering::Release);
      let downstream = self.downstream.lock().take();
      if let Some(downstream) = downstream {
        error_to(&*downstream.plain, TapError::Listener(err));
      }
      return;
    }

    let (downstream, me) = match (self.downstream(), self.me.upgrade()) {
      (Some(downstream), Some(me)) => (downstream, me),
      _ => return,
    };
    downstream.plain.on_subscribe(me);
  }

  fn on_next(&self, item: T) {
    let _scope = self.enter();
    if self.is_terminated() {
      self.malformed_next(item);
      return;
    }
    if let Err(err) = self.hook("do_on_next", |l| l.do_on_next(&item)) {
      self.fail(err);
      return;
    }
    match self.downstream() {
      Some(downstream) => downstream.plain.on_next(item),
      None => hooks::next_dropped(&item),
    }
  }

  fn on_error(&self, error: E) {
    let _scope = self.enter();
    if self.done.swap(true, Ordering::AcqRel) {
      if let Err(err) = self.hook("do_on_malformed_on_error", |l| l.do_on_malformed_on_error(&error)) {
        self.drop_fault(err);
      }
      hooks::error_dropped(&error);
      return;
    }

    if let Err(err) = self.hook("do_on_error", |l| l.do_on_error(&error)) {
      self.cancel_upstream();
      self.report(&err);
      self.terminate(TapError::Multiple { listener: err, original: error });
      return;
    }

    let downstream = self.downstream.lock().take();
    match downstream {
      Some(downstream) => downstream.plain.on_error(TapError::Source(error.clone())),
      None => hooks::error_dropped(&error),
    }

    let after = self
      .hook("do_after_error", |l| l.do_after_error(&error))
      .and_then(|_| self.finally(SignalType::Error));
    if let Err(err) = after {
      self.drop_fault(err);
    }
  }

  fn on_complete(&self) {
    let _scope = self.enter();
    if self.done.swap(true, Ordering::AcqRel) {
      if let Err(err) = self.hook("do_on_malformed_on_complete", L::do_on_malformed_on_complete) {
        self.drop_fault(err);
      }
      return;
    }

    if let Err(err) = self.hook("do_on_complete", L::do_on_complete) {
      self.fail(err);
      return;
    }

    let downstream = self.downstream.lock().take();
    if let Some(downstream) = downstream {
      downstream.plain.on_complete();
    }

    let after = self
      .hook("do_after_complete", L::do_after_complete)
      .and_then(|_| self.finally(SignalType::Complete));
    if let Err(err) = after {
      self.drop_fault(err);
    }
  }

  fn current_context(&self) -> Context { self.context.clone() }

  fn as_conditional(self: Arc<Self>) -> Option<Arc<dyn ConditionalSubscriber<T, E>>> {
    let conditional = self
      .downstream
      .lock()
      .as_ref()
      .map_or(false, |d| d.conditional.is_some());
    if conditional {
      Some(self)
    } else {
      None
    }
  }
}

impl<T, E, L> ConditionalSubscriber<T, E> for TapSubscriber<T, E, L>
where
  T: Clone + Send + 'static,
  E: Clone + Debug + Send + 'static,
  L: SignalListener<T, E> + 'static,
{
  fn try_on_next(&self, item: T) -> bool {
    let _scope = self.enter();
    if self.is_terminated() {
      self.malformed_next(item);
      return true;
    }
    let downstream = match self.downstream() {
      Some(downstream) => downstream,
      None => {
        hooks::next_dropped(&item);
        return true;
      }
    };

    // delivered first, the hook only sees consumed items
    let consumed = match &downstream.conditional {
      Some(conditional) => conditional.try_on_next(item.clone()),
      None => {
        downstream.plain.on_next(item.clone());
        true
      }
    };
    if !consumed {
      return false;
    }

    if let Err(err) = self.hook("do_on_next", |l| l.do_on_next(&item)) {
      self.fail(err);
    }
    true
  }
}

impl<T, E, L> Subscription for TapSubscriber<T, E, L>
where
  T: Clone + Send + 'static,
  E: Clone + Debug + Send + 'static,
  L: SignalListener<T, E> + 'static,
{
  fn request(&self, n: u64) {
    let _scope = self.enter();
    if !validate_request(n) {
      return;
    }
    if let Err(err) = self.hook("do_on_request", |l| l.do_on_request(n)) {
      self.fail(err);
      return;
    }
    if let Some(upstream) = self.upstream.get() {
      upstream.request(n)
    }
  }

  fn cancel(&self) {
    let _scope = self.enter();
    if let Err(err) = self.hook("do_on_cancel", L::do_on_cancel) {
      self.report(&err);
      self.terminate(TapError::Listener(err));
      return;
    }

    self.cancel_upstream();
    if let Err(err) = self.finally(SignalType::Cancel) {
      // upstream is cancelled again, which is a no-op
      self.fail(err);
      return;
    }
    // releases the downstream, late signals are dropped
    self.downstream.lock().take();
  }
}

#[cfg(test)]
mod tests {
  use std::{convert::Infallible, sync::atomic::AtomicUsize};

  use bencher::Bencher;

  use super::*;
  use crate::{
    hooks::test_util::{capture, dropped_errors, dropped_items},
    prelude::*,
    scope::{current_context, NoopScope},
    subscription::EmptySubscription,
    testing::{HookLog, ScriptedListener, TestPublisher, TestSubscriber},
  };

  type Out = TestSubscriber<i32, TapError<&'static str>>;

  fn scripted(log: &HookLog) -> ScriptedListener<i32, &'static str> { ScriptedListener::new(log) }

  /// Subscribes a recording subscriber through a tap whose listener is built
  /// by `listener`.
  fn wire(
    log: &HookLog,
    listener: impl Fn(&HookLog) -> ScriptedListener<i32, &'static str> + Send + Sync + 'static,
  ) -> (TestPublisher<i32, &'static str>, Arc<Out>) {
    let publisher = TestPublisher::new();
    let subscriber: Arc<Out> = TestSubscriber::builder().log(log).build();
    let hook_log = log.clone();
    publisher
      .clone()
      .tap_fn(move |_: &Context| listener(&hook_log))
      .subscribe(subscriber.clone());
    (publisher, subscriber)
  }

  fn hook_names(subscriber: &Out) -> Vec<Option<&'static str>> {
    subscriber.map_errors(|e| e.listener_error().and_then(ListenerError::hook_name))
  }

  #[test]
  fn forwards_signals_unchanged() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    publisher.emit([1, 2]);
    publisher.complete();

    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(subscriber.is_completed());
    assert_eq!(
      log.entries(),
      vec![
        "do_first",
        "add_to_context",
        "do_on_subscription",
        "on_subscribe",
        "do_on_request(18446744073709551615)",
        "do_on_next(1)",
        "on_next(1)",
        "do_on_next(2)",
        "on_next(2)",
        "do_on_complete",
        "on_complete",
        "do_after_complete",
        "do_finally(on_complete)",
      ]
    );
    assert_eq!(publisher.requests(), vec![UNBOUNDED]);
  }

  #[test]
  fn error_hooks_run_around_delivery() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    log.clear();
    publisher.error("boom");

    assert_eq!(subscriber.map_errors(|e| e.source_error().copied()), vec![Some("boom")]);
    assert_eq!(
      log.entries(),
      vec![
        "do_on_error(\"boom\")",
        "on_error",
        "do_after_error(\"boom\")",
        "do_finally(on_error)",
      ]
    );
  }

  #[test]
  fn failing_on_next_cancels_and_terminates() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on_next(|v| *v == 2));
    publisher.emit([1, 2, 3]);
    publisher.complete();

    assert_eq!(subscriber.values(), vec![1]);
    assert_eq!(subscriber.terminal_count(), 1);
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_next")]);
    assert_eq!(publisher.cancel_count(), 1);
    assert_eq!(log.count("handle_listener_error(do_on_next)"), 1);
    assert_eq!(log.count("do_on_malformed_on_next(3)"), 1);
    assert_eq!(log.count("do_on_malformed_on_complete"), 1);
    assert_eq!(log.count("do_finally"), 0);
  }

  #[test]
  fn failing_on_error_combines_errors() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_on_error"));
    publisher.error("upstream");

    let errors = subscriber.map_errors(|e| match e {
      TapError::Multiple { listener, original } => Some((listener.hook_name(), *original)),
      _ => None,
    });
    assert_eq!(errors, vec![Some((Some("do_on_error"), "upstream"))]);
    assert_eq!(publisher.cancel_count(), 1);
    assert_eq!(log.count("do_after_error"), 0);
    assert_eq!(log.count("do_finally"), 0);
  }

  #[test]
  fn failing_on_complete_terminates_with_listener_error() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_on_complete"));
    publisher.complete();

    assert!(!subscriber.is_completed());
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_complete")]);
    assert_eq!(publisher.cancel_count(), 1);
    assert_eq!(log.count("do_after_complete"), 0);
    assert_eq!(log.count("do_finally"), 0);
  }

  #[test]
  fn after_terminal_faults_are_dropped() {
    capture();
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_after_complete"));
    publisher.complete();

    assert!(subscriber.is_completed());
    assert_eq!(subscriber.terminal_count(), 1);
    assert_eq!(log.count("handle_listener_error(do_after_complete)"), 1);
    assert_eq!(log.count("do_finally"), 0);
    assert_eq!(dropped_errors().len(), 1);
    assert!(dropped_errors()[0].contains("do_after_complete"));
  }

  #[test]
  fn failing_finally_after_error_is_dropped() {
    capture();
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_finally"));
    publisher.error("boom");

    assert_eq!(subscriber.terminal_count(), 1);
    assert_eq!(subscriber.map_errors(TapError::is_listener_fault), vec![false]);
    assert_eq!(log.count("handle_listener_error(do_finally)"), 1);
    assert_eq!(dropped_errors().len(), 1);
  }

  #[test]
  fn malformed_signals_are_contained() {
    capture();
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| {
      scripted(log)
        .failing_on("do_on_malformed_on_next")
        .failing_on("do_on_malformed_on_error")
    });
    publisher.complete();
    publisher.next(7);
    publisher.error("late");
    publisher.complete();

    assert_eq!(subscriber.terminal_count(), 1);
    assert!(subscriber.is_completed());
    assert!(subscriber.values().is_empty());
    assert_eq!(log.count("do_on_malformed_on_next(7)"), 1);
    assert_eq!(log.count("do_on_malformed_on_error(\"late\")"), 1);
    assert_eq!(log.count("do_on_malformed_on_complete"), 1);
    assert_eq!(log.count("handle_listener_error"), 2);
    assert_eq!(log.count("do_finally"), 1);
    assert_eq!(dropped_items(), 1);
    // two listener faults plus the late upstream error
    assert_eq!(dropped_errors().len(), 3);
  }

  #[test]
  fn failing_on_subscription_cancels_prepared_handle() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_on_subscription"));

    assert_eq!(publisher.cancel_count(), 1);
    assert_eq!(subscriber.subscribe_count(), 1);
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_subscription")]);
    assert!(publisher.requests().is_empty());

    publisher.next(1);
    assert!(subscriber.values().is_empty());
    assert_eq!(subscriber.terminal_count(), 1);
  }

  #[test]
  fn duplicate_subscription_is_cancelled() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    let extra = publisher.send_duplicate_subscription();

    assert!(extra.is_cancelled());
    assert!(!publisher.is_cancelled());
    assert_eq!(subscriber.subscribe_count(), 1);
    assert_eq!(log.count("do_on_subscription"), 1);
  }

  #[test]
  fn failing_on_request_cancels_and_terminates() {
    let log = HookLog::new();
    let publisher = TestPublisher::<i32, &'static str>::new();
    let subscriber: Arc<Out> = TestSubscriber::with_initial_request(0);
    let hook_log = log.clone();
    publisher
      .clone()
      .tap_fn(move |_: &Context| scripted(&hook_log).failing_on("do_on_request"))
      .subscribe(subscriber.clone());
    subscriber.request(3);

    assert!(publisher.requests().is_empty());
    assert_eq!(publisher.cancel_count(), 1);
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_request")]);
  }

  #[test]
  fn zero_request_is_ignored() {
    capture();
    let log = HookLog::new();
    let publisher = TestPublisher::<i32, &'static str>::new();
    let subscriber: Arc<Out> = TestSubscriber::with_initial_request(0);
    let hook_log = log.clone();
    publisher
      .clone()
      .tap_fn(move |_: &Context| scripted(&hook_log))
      .subscribe(subscriber.clone());
    subscriber.request(0);

    assert_eq!(log.count("do_on_request"), 0);
    assert!(publisher.requests().is_empty());
    assert_eq!(dropped_errors().len(), 1);
  }

  #[test]
  fn cancel_runs_finally_once() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    subscriber.cancel();
    subscriber.cancel();

    assert_eq!(publisher.cancel_count(), 2);
    assert_eq!(log.count("do_on_cancel"), 2);
    assert_eq!(log.count("do_finally(cancel)"), 1);
    assert!(!subscriber.is_terminated());
  }

  struct DropFlag(Arc<AtomicBool>);

  impl SignalListener<i32, Infallible> for DropFlag {}

  impl Drop for DropFlag {
    fn drop(&mut self) { self.0.store(true, Ordering::SeqCst); }
  }

  #[test]
  fn cancel_releases_downstream_and_listener() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let subscriber = TestSubscriber::<i32, TapError<Infallible>>::with_initial_request(2);
    let downstream = Arc::downgrade(&subscriber);
    from_iter(0..10)
      .tap_fn(move |_: &Context| DropFlag(flag.clone()))
      .subscribe(subscriber.clone());
    assert_eq!(subscriber.values(), vec![0, 1]);

    subscriber.cancel();
    drop(subscriber);

    assert!(downstream.upgrade().is_none());
    assert!(dropped.load(Ordering::SeqCst));
  }

  #[test]
  fn items_after_cancel_are_dropped() {
    capture();
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    subscriber.cancel();
    publisher.next(1);

    assert!(subscriber.values().is_empty());
    assert_eq!(log.count("do_on_next(1)"), 1);
    assert_eq!(dropped_items(), 1);
  }

  #[test]
  fn failing_on_cancel_leaves_upstream_alone() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_on_cancel"));
    subscriber.cancel();

    assert_eq!(publisher.cancel_count(), 0);
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_cancel")]);
    assert_eq!(log.count("do_finally"), 0);
  }

  #[test]
  fn failing_finally_on_cancel_terminates() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_finally"));
    subscriber.cancel();

    assert_eq!(publisher.cancel_count(), 2);
    assert_eq!(hook_names(&subscriber), vec![Some("do_finally")]);
  }

  #[test]
  fn cancel_after_completion_skips_finally() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, scripted);
    publisher.complete();
    subscriber.cancel();

    assert_eq!(log.count("do_finally"), 1);
    assert_eq!(log.count("do_finally(on_complete)"), 1);
  }

  #[test]
  fn conditional_downstream_keeps_fast_path() {
    let log = HookLog::new();
    let publisher = TestPublisher::<i32, &'static str>::new();
    let subscriber: Arc<Out> = TestSubscriber::builder().accepting(|v: &i32| v % 2 == 1).build();
    let hook_log = log.clone();
    publisher
      .clone()
      .tap_fn(move |_: &Context| scripted(&hook_log))
      .subscribe(subscriber.clone());

    assert!(publisher.try_next(1));
    assert!(!publisher.try_next(2));
    assert!(publisher.try_next(3));
    assert_eq!(subscriber.values(), vec![1, 3]);
    assert_eq!(log.count("do_on_next"), 2);
  }

  #[test]
  fn fast_path_failure_still_consumes() {
    let log = HookLog::new();
    let publisher = TestPublisher::<i32, &'static str>::new();
    let subscriber: Arc<Out> = TestSubscriber::builder().accepting(|_: &i32| true).build();
    let hook_log = log.clone();
    publisher
      .clone()
      .tap_fn(move |_: &Context| scripted(&hook_log).failing_on_next(|v| *v == 1))
      .subscribe(subscriber.clone());

    assert!(publisher.try_next(1));
    assert_eq!(subscriber.values(), vec![1]);
    assert_eq!(hook_names(&subscriber), vec![Some("do_on_next")]);
    assert_eq!(publisher.cancel_count(), 1);
  }

  #[test]
  fn plain_downstream_is_not_conditional() {
    let log = HookLog::new();
    let (publisher, _subscriber) = wire(&log, scripted);
    // falls back to `on_next`
    assert!(publisher.try_next(5));
    assert_eq!(log.count("do_on_next(5)"), 1);
  }

  #[test]
  fn factory_failure_skips_every_hook() {
    struct Refusing;

    impl SignalListenerFactory<i32, &'static str> for Refusing {
      type State = ();
      type Listener = ScriptedListener<i32, &'static str>;

      fn initialize_publisher_state(&self, _: &dyn Publisher<Item = i32, Err = &'static str>) {}

      fn create_listener(
        &self,
        _: &dyn Publisher<Item = i32, Err = &'static str>,
        _: &Context,
        _: &(),
      ) -> Result<Self::Listener, crate::error::BoxError> {
        Err("no listener".into())
      }
    }

    let publisher = TestPublisher::<i32, &'static str>::new();
    let subscriber: Arc<Out> = TestSubscriber::new();
    publisher.clone().tap(Refusing).subscribe(subscriber.clone());

    assert_eq!(publisher.subscriber_count(), 0);
    assert_eq!(subscriber.subscribe_count(), 1);
    assert_eq!(
      subscriber.map_errors(|e| e.listener_error().map(ListenerError::as_label)),
      vec![Some("listener_creation")]
    );
  }

  #[test]
  fn failing_do_first_never_subscribes() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("do_first"));

    assert_eq!(publisher.subscriber_count(), 0);
    assert_eq!(hook_names(&subscriber), vec![Some("do_first")]);
    assert_eq!(log.entries(), vec!["do_first", "handle_listener_error(do_first)", "on_subscribe", "on_error"]);
  }

  #[test]
  fn failing_context_augmentation_never_subscribes() {
    let log = HookLog::new();
    let (publisher, subscriber) = wire(&log, |log| scripted(log).failing_on("add_to_context"));

    assert_eq!(publisher.subscriber_count(), 0);
    assert_eq!(
      subscriber.map_errors(|e| e.listener_error().map(ListenerError::as_label)),
      vec![Some("listener_context_augmentation")]
    );
    assert_eq!(log.count("handle_listener_error(listener_context_augmentation)"), 1);
  }

  #[derive(Default)]
  struct AmbientProbe {
    seen: Arc<Mutex<Vec<Option<u64>>>>,
  }

  impl SignalListener<i32, Infallible> for AmbientProbe {
    fn do_on_next(&mut self, _: &i32) -> HookResult {
      self.seen.lock().push(current_context().get::<u64>("trace").copied());
      Ok(())
    }

    fn add_to_context(&mut self, context: Context) -> Result<Context, crate::error::BoxError> {
      Ok(context.put("trace", 42_u64))
    }
  }

  #[test]
  fn augmented_context_is_installed_around_hooks() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = seen.clone();
    let subscriber = TestSubscriber::new();
    from_iter(vec![1, 2])
      .tap_fn(move |_: &Context| AmbientProbe { seen: probe.clone() })
      .subscribe(subscriber.clone());

    assert_eq!(*seen.lock(), vec![Some(42), Some(42)]);
    assert!(current_context().is_empty());
  }

  #[test]
  fn noop_scope_installs_nothing() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = seen.clone();
    let subscriber = TestSubscriber::new();
    from_iter(vec![1])
      .tap_fn(move |_: &Context| AmbientProbe { seen: probe.clone() })
      .with_scope(NoopScope)
      .subscribe(subscriber.clone());

    assert_eq!(*seen.lock(), vec![None]);
  }

  #[test]
  fn shared_state_is_computed_once() {
    struct Counting(Arc<AtomicUsize>);

    impl SignalListenerFactory<i32, Infallible> for Counting {
      type State = usize;
      type Listener = NoopListener<i32, Infallible>;

      fn initialize_publisher_state(&self, _: &dyn Publisher<Item = i32, Err = Infallible>) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 10
      }

      fn create_listener(
        &self,
        _: &dyn Publisher<Item = i32, Err = Infallible>,
        _: &Context,
        state: &usize,
      ) -> Result<Self::Listener, crate::error::BoxError> {
        assert_eq!(*state, 10);
        Ok(NoopListener::default())
      }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let tap = from_iter(0..3).tap(Counting(calls.clone()));
    for _ in 0..3 {
      let subscriber = TestSubscriber::new();
      tap.subscribe(subscriber.clone());
      assert_eq!(subscriber.values(), vec![0, 1, 2]);
    }
    assert_eq!(*tap.state(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn terminated_flag_follows_signals() {
    let subscriber = TestSubscriber::<i32, TapError<&'static str>>::new();
    let tap = TapSubscriber::new(
      subscriber.clone(),
      NoopListener::<i32, &'static str>::default(),
      Context::empty(),
      Arc::new(NoopScope),
    );
    tap.on_subscribe(Arc::new(EmptySubscription));
    assert!(!tap.is_terminated());
    tap.on_complete();
    assert!(tap.is_terminated());
    assert!(subscriber.is_completed());
  }

  #[test]
  fn bench() { do_bench(); }

  benchmark_group!(do_bench, bench_tap);

  fn bench_tap(b: &mut Bencher) { b.iter(forwards_signals_unchanged); }
}

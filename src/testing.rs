//! Test doubles for exercising taps and listeners.
//!
//! - [`TestSubscriber`] records every signal it receives, requests an initial
//!   demand and can act as a [`ConditionalSubscriber`].
//! - [`TestPublisher`] is driven by hand. It does not enforce the protocol,
//!   so it can emit malformed sequences (items after completion, duplicate
//!   terminals, a second `on_subscribe`).
//! - [`ScriptedListener`] records its hooks into a [`HookLog`] and fails the
//!   hooks it is told to fail.

use std::{
  fmt::Debug,
  marker::PhantomData,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  context::Context,
  error::ListenerError,
  listener::{HookResult, SignalListener, SignalType},
  publisher::Publisher,
  subscriber::{ConditionalSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
};

/// A signal as recorded by [`TestSubscriber`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal<T, E> {
  Subscribe,
  Next(T),
  Error(E),
  Complete,
}

impl<T, E> Signal<T, E> {
  pub fn is_terminal(&self) -> bool { matches!(self, Signal::Error(_) | Signal::Complete) }
}

// ============================================================================
// HookLog
// ============================================================================

/// Shared, ordered log of hook and signal names.
#[derive(Clone, Default)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
  pub fn new() -> Self { Self::default() }

  pub fn push(&self, entry: impl Into<String>) { self.0.lock().push(entry.into()); }

  pub fn entries(&self) -> Vec<String> { self.0.lock().clone() }

  /// Number of entries starting with `prefix`.
  pub fn count(&self, prefix: &str) -> usize {
    self
      .0
      .lock()
      .iter()
      .filter(|e| e.starts_with(prefix))
      .count()
  }

  pub fn clear(&self) { self.0.lock().clear(); }
}

impl Debug for HookLog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.0.lock().iter()).finish()
  }
}

// ============================================================================
// TestSubscriber
// ============================================================================

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Subscriber recording every signal it receives.
pub struct TestSubscriber<T, E> {
  signals: Mutex<Vec<Signal<T, E>>>,
  subscription: Mutex<Option<SubscriptionRef>>,
  initial_request: u64,
  accept: Option<Predicate<T>>,
  context: Context,
  log: Option<HookLog>,
}

impl<T, E> TestSubscriber<T, E> {
  /// Requests everything on subscription.
  pub fn new() -> Arc<Self> { Self::builder().build() }

  /// Requests `n` items on subscription, none if `n` is 0.
  pub fn with_initial_request(n: u64) -> Arc<Self> { Self::builder().initial_request(n).build() }

  pub fn builder() -> TestSubscriberBuilder<T, E> {
    TestSubscriberBuilder {
      initial_request: UNBOUNDED,
      accept: None,
      context: Context::empty(),
      log: None,
      _marker: PhantomData,
    }
  }

  /// Signals more demand through the received subscription.
  pub fn request(&self, n: u64) {
    if let Some(subscription) = self.subscription() {
      subscription.request(n)
    }
  }

  pub fn cancel(&self) {
    if let Some(subscription) = self.subscription() {
      subscription.cancel()
    }
  }

  /// The last subscription received.
  pub fn subscription(&self) -> Option<SubscriptionRef> { self.subscription.lock().clone() }

  pub fn is_subscribed(&self) -> bool { self.subscription.lock().is_some() }

  pub fn is_completed(&self) -> bool { self.signals.lock().iter().any(|s| matches!(s, Signal::Complete)) }

  pub fn is_terminated(&self) -> bool { self.terminal_count() > 0 }

  /// Number of terminal signals received. Anything above 1 is a protocol
  /// violation.
  pub fn terminal_count(&self) -> usize { self.signals.lock().iter().filter(|s| s.is_terminal()).count() }

  pub fn subscribe_count(&self) -> usize {
    self
      .signals
      .lock()
      .iter()
      .filter(|s| matches!(s, Signal::Subscribe))
      .count()
  }

  /// Maps every received error, for error types that are not `Clone`.
  pub fn map_errors<R>(&self, f: impl Fn(&E) -> R) -> Vec<R> {
    self
      .signals
      .lock()
      .iter()
      .filter_map(|s| match s {
        Signal::Error(e) => Some(f(e)),
        _ => None,
      })
      .collect()
  }

  fn record(&self, signal: Signal<T, E>) { self.signals.lock().push(signal); }

  fn log(&self, entry: impl FnOnce() -> String) {
    if let Some(log) = &self.log {
      log.push(entry())
    }
  }
}

impl<T: Clone, E> TestSubscriber<T, E> {
  pub fn values(&self) -> Vec<T> {
    self
      .signals
      .lock()
      .iter()
      .filter_map(|s| match s {
        Signal::Next(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }
}

impl<T, E: Clone> TestSubscriber<T, E> {
  pub fn errors(&self) -> Vec<E> { self.map_errors(E::clone) }
}

impl<T: Clone, E: Clone> TestSubscriber<T, E> {
  pub fn signals(&self) -> Vec<Signal<T, E>> { self.signals.lock().clone() }
}

impl<T, E> Subscriber<T, E> for TestSubscriber<T, E>
where
  T: Debug + Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&self, subscription: SubscriptionRef) {
    self.log(|| "on_subscribe".into());
    self.record(Signal::Subscribe);
    *self.subscription.lock() = Some(subscription.clone());
    if self.initial_request > 0 {
      subscription.request(self.initial_request);
    }
  }

  fn on_next(&self, item: T) {
    self.log(|| format!("on_next({item:?})"));
    self.record(Signal::Next(item));
  }

  fn on_error(&self, error: E) {
    self.log(|| "on_error".into());
    self.record(Signal::Error(error));
  }

  fn on_complete(&self) {
    self.log(|| "on_complete".into());
    self.record(Signal::Complete);
  }

  fn current_context(&self) -> Context { self.context.clone() }

  fn as_conditional(self: Arc<Self>) -> Option<Arc<dyn ConditionalSubscriber<T, E>>> {
    if self.accept.is_some() {
      Some(self)
    } else {
      None
    }
  }
}

impl<T, E> ConditionalSubscriber<T, E> for TestSubscriber<T, E>
where
  T: Debug + Send + 'static,
  E: Send + 'static,
{
  fn try_on_next(&self, item: T) -> bool {
    let accepted = self.accept.as_ref().map_or(true, |accept| accept(&item));
    if accepted {
      self.on_next(item);
    }
    accepted
  }
}

pub struct TestSubscriberBuilder<T, E> {
  initial_request: u64,
  accept: Option<Predicate<T>>,
  context: Context,
  log: Option<HookLog>,
  _marker: PhantomData<fn() -> E>,
}

impl<T, E> TestSubscriberBuilder<T, E> {
  /// Demand requested on subscription. Defaults to [`UNBOUNDED`].
  pub fn initial_request(mut self, n: u64) -> Self {
    self.initial_request = n;
    self
  }

  /// Makes the subscriber conditional, consuming only the items `accept`
  /// returns `true` for.
  pub fn accepting(mut self, accept: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
    self.accept = Some(Box::new(accept));
    self
  }

  /// Context the subscriber carries upstream.
  pub fn context(mut self, context: Context) -> Self {
    self.context = context;
    self
  }

  /// Also appends every received signal to `log`.
  pub fn log(mut self, log: &HookLog) -> Self {
    self.log = Some(log.clone());
    self
  }

  pub fn build(self) -> Arc<TestSubscriber<T, E>> {
    Arc::new(TestSubscriber {
      signals: Mutex::new(Vec::new()),
      subscription: Mutex::new(None),
      initial_request: self.initial_request,
      accept: self.accept,
      context: self.context,
      log: self.log,
    })
  }
}

// ============================================================================
// TestPublisher
// ============================================================================

/// Subscription recording the demand and cancellations it receives.
#[derive(Default)]
pub struct TestSubscription {
  requests: Mutex<Vec<u64>>,
  cancels: AtomicUsize,
}

impl TestSubscription {
  pub fn requests(&self) -> Vec<u64> { self.requests.lock().clone() }

  pub fn cancel_count(&self) -> usize { self.cancels.load(Ordering::SeqCst) }

  pub fn is_cancelled(&self) -> bool { self.cancel_count() > 0 }
}

impl Subscription for TestSubscription {
  fn request(&self, n: u64) { self.requests.lock().push(n); }

  fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
}

struct Wired<T, E> {
  plain: Arc<dyn Subscriber<T, E>>,
  conditional: Option<Arc<dyn ConditionalSubscriber<T, E>>>,
}

impl<T, E> Clone for Wired<T, E> {
  fn clone(&self) -> Self { Wired { plain: self.plain.clone(), conditional: self.conditional.clone() } }
}

struct PublisherState<T, E> {
  subscribers: Mutex<Vec<Wired<T, E>>>,
  subscription: Arc<TestSubscription>,
}

/// Publisher emitting whatever the test tells it to, ignoring demand.
///
/// Every subscriber shares one [`TestSubscription`]. Cloning the publisher
/// yields a handle on the same subscribers.
pub struct TestPublisher<T, E> {
  state: Arc<PublisherState<T, E>>,
}

impl<T, E> Clone for TestPublisher<T, E> {
  fn clone(&self) -> Self { TestPublisher { state: self.state.clone() } }
}

impl<T, E> Default for TestPublisher<T, E> {
  fn default() -> Self {
    TestPublisher {
      state: Arc::new(PublisherState {
        subscribers: Mutex::new(Vec::new()),
        subscription: Arc::new(TestSubscription::default()),
      }),
    }
  }
}

impl<T, E> TestPublisher<T, E> {
  pub fn new() -> Self { Self::default() }

  pub fn subscriber_count(&self) -> usize { self.state.subscribers.lock().len() }

  pub fn subscription(&self) -> Arc<TestSubscription> { self.state.subscription.clone() }

  /// Every demand received, in order.
  pub fn requests(&self) -> Vec<u64> { self.state.subscription.requests() }

  pub fn cancel_count(&self) -> usize { self.state.subscription.cancel_count() }

  pub fn is_cancelled(&self) -> bool { self.state.subscription.is_cancelled() }

  fn wired(&self) -> Vec<Wired<T, E>> { self.state.subscribers.lock().clone() }

  pub fn complete(&self) {
    for s in self.wired() {
      s.plain.on_complete()
    }
  }

  /// Sends a second `on_subscribe` with a fresh subscription, which is
  /// returned.
  pub fn send_duplicate_subscription(&self) -> Arc<TestSubscription> {
    let extra = Arc::new(TestSubscription::default());
    for s in self.wired() {
      s.plain.on_subscribe(extra.clone())
    }
    extra
  }
}

impl<T: Clone, E> TestPublisher<T, E> {
  pub fn next(&self, item: T) {
    for s in self.wired() {
      s.plain.on_next(item.clone())
    }
  }

  /// Offers `item` through the conditional path of each subscriber that has
  /// one. Returns `true` if every subscriber consumed it.
  pub fn try_next(&self, item: T) -> bool {
    self.wired().into_iter().fold(true, |all, s| {
      let consumed = match &s.conditional {
        Some(conditional) => conditional.try_on_next(item.clone()),
        None => {
          s.plain.on_next(item.clone());
          true
        }
      };
      all && consumed
    })
  }

  pub fn emit(&self, items: impl IntoIterator<Item = T>) {
    for item in items {
      self.next(item)
    }
  }
}

impl<T, E: Clone> TestPublisher<T, E> {
  pub fn error(&self, error: E) {
    for s in self.wired() {
      s.plain.on_error(error.clone())
    }
  }
}

impl<T, E> Publisher for TestPublisher<T, E> {
  type Item = T;
  type Err = E;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<T, E>>) {
    let conditional = subscriber.clone().as_conditional();
    self
      .state
      .subscribers
      .lock()
      .push(Wired { plain: subscriber.clone(), conditional });
    subscriber.on_subscribe(self.state.subscription.clone());
  }
}

// ============================================================================
// ScriptedListener
// ============================================================================

/// Listener appending every hook it runs to a [`HookLog`], failing the hooks
/// it was told to fail.
///
/// Entries are the hook name, followed by the argument in parentheses when
/// the hook takes one, e.g. `do_on_next(1)` or `do_finally(on_complete)`.
pub struct ScriptedListener<T, E> {
  log: HookLog,
  failing: Vec<&'static str>,
  fail_next: Option<Box<dyn Fn(&T) -> bool + Send>>,
  augment: Option<Box<dyn FnOnce(Context) -> Context + Send>>,
  _marker: PhantomData<fn(&E)>,
}

impl<T, E> ScriptedListener<T, E> {
  pub fn new(log: &HookLog) -> Self {
    ScriptedListener {
      log: log.clone(),
      failing: Vec::new(),
      fail_next: None,
      augment: None,
      _marker: PhantomData,
    }
  }

  /// Makes the hook named `hook` fail every time it runs.
  pub fn failing_on(mut self, hook: &'static str) -> Self {
    self.failing.push(hook);
    self
  }

  /// Makes `do_on_next` fail for the items matching `when`.
  pub fn failing_on_next(mut self, when: impl Fn(&T) -> bool + Send + 'static) -> Self {
    self.fail_next = Some(Box::new(when));
    self
  }

  /// Uses `augment` in `add_to_context`.
  pub fn augmenting(mut self, augment: impl FnOnce(Context) -> Context + Send + 'static) -> Self {
    self.augment = Some(Box::new(augment));
    self
  }

  fn run(&self, hook: &'static str, entry: String) -> HookResult {
    self.log.push(entry);
    if self.failing.contains(&hook) {
      Err(format!("{hook} failed").into())
    } else {
      Ok(())
    }
  }
}

impl<T: Debug, E: Debug> SignalListener<T, E> for ScriptedListener<T, E> {
  fn do_first(&mut self) -> HookResult { self.run("do_first", "do_first".into()) }

  fn do_on_subscription(&mut self) -> HookResult {
    self.run("do_on_subscription", "do_on_subscription".into())
  }

  fn do_on_next(&mut self, value: &T) -> HookResult {
    self.run("do_on_next", format!("do_on_next({value:?})"))?;
    match &self.fail_next {
      Some(when) if when(value) => Err(format!("do_on_next failed on {value:?}").into()),
      _ => Ok(()),
    }
  }

  fn do_on_malformed_on_next(&mut self, value: &T) -> HookResult {
    self.run("do_on_malformed_on_next", format!("do_on_malformed_on_next({value:?})"))
  }

  fn do_on_error(&mut self, error: &E) -> HookResult {
    self.run("do_on_error", format!("do_on_error({error:?})"))
  }

  fn do_on_malformed_on_error(&mut self, error: &E) -> HookResult {
    self.run("do_on_malformed_on_error", format!("do_on_malformed_on_error({error:?})"))
  }

  fn do_after_error(&mut self, error: &E) -> HookResult {
    self.run("do_after_error", format!("do_after_error({error:?})"))
  }

  fn do_on_complete(&mut self) -> HookResult { self.run("do_on_complete", "do_on_complete".into()) }

  fn do_on_malformed_on_complete(&mut self) -> HookResult {
    self.run("do_on_malformed_on_complete", "do_on_malformed_on_complete".into())
  }

  fn do_after_complete(&mut self) -> HookResult {
    self.run("do_after_complete", "do_after_complete".into())
  }

  fn do_finally(&mut self, signal: SignalType) -> HookResult {
    self.run("do_finally", format!("do_finally({signal})"))
  }

  fn do_on_request(&mut self, n: u64) -> HookResult { self.run("do_on_request", format!("do_on_request({n})")) }

  fn do_on_cancel(&mut self) -> HookResult { self.run("do_on_cancel", "do_on_cancel".into()) }

  fn add_to_context(&mut self, context: Context) -> Result<Context, crate::error::BoxError> {
    self.run("add_to_context", "add_to_context".into())?;
    Ok(match self.augment.take() {
      Some(augment) => augment(context),
      None => context,
    })
  }

  fn handle_listener_error(&mut self, error: &ListenerError) {
    let origin = error.hook_name().unwrap_or_else(|| error.as_label());
    self.log.push(format!("handle_listener_error({origin})"));
  }
}

use std::{
  convert::Infallible,
  iter::Peekable,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  publisher::Publisher,
  subscriber::{complete_to, ConditionalSubscriber, Subscriber},
  subscription::{add_demand, validate_request, Subscription, UNBOUNDED},
};

/// Creates a publisher that produces the values of an iterator, honoring the
/// demand of each subscriber.
///
/// Every subscription iterates its own clone of `iter`. Completes when all
/// elements have been emitted. Never emits an error.
///
/// # Examples
///
/// ```
/// use rxtap::prelude::*;
///
/// let subscriber = TestSubscriber::with_initial_request(2);
/// from_iter(0..10).subscribe(subscriber.clone());
/// assert_eq!(subscriber.values(), vec![0, 1]);
///
/// subscriber.request(UNBOUNDED);
/// assert_eq!(subscriber.values().len(), 10);
/// assert!(subscriber.is_completed());
/// ```
pub fn from_iter<I>(iter: I) -> FromIter<I>
where
  I: IntoIterator + Clone,
{
  FromIter(iter)
}

#[derive(Clone)]
pub struct FromIter<I>(I);

impl<I> Publisher for FromIter<I>
where
  I: IntoIterator + Clone,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;
  type Err = Infallible;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<I::Item, Infallible>>) {
    let mut iter = self.0.clone().into_iter().peekable();
    if iter.peek().is_none() {
      complete_to(&*subscriber);
      return;
    }
    let target = match subscriber.clone().as_conditional() {
      Some(conditional) => Target::Conditional(conditional),
      None => Target::Plain(subscriber.clone()),
    };
    let subscription = Arc::new(IterSubscription {
      iter: Mutex::new(iter),
      target: Mutex::new(Some(target)),
      requested: AtomicU64::new(0),
      cancelled: AtomicBool::new(false),
    });
    subscriber.on_subscribe(subscription);
  }
}

enum Target<T> {
  Plain(Arc<dyn Subscriber<T, Infallible>>),
  Conditional(Arc<dyn ConditionalSubscriber<T, Infallible>>),
}

impl<T> Clone for Target<T> {
  fn clone(&self) -> Self {
    match self {
      Target::Plain(s) => Target::Plain(s.clone()),
      Target::Conditional(s) => Target::Conditional(s.clone()),
    }
  }
}

impl<T> Target<T> {
  /// Returns `true` if the item consumed demand.
  fn deliver(&self, item: T) -> bool {
    match self {
      Target::Plain(s) => {
        s.on_next(item);
        true
      }
      Target::Conditional(s) => s.try_on_next(item),
    }
  }

  fn complete(&self) {
    match self {
      Target::Plain(s) => s.on_complete(),
      Target::Conditional(s) => s.on_complete(),
    }
  }
}

struct IterSubscription<It: Iterator> {
  iter: Mutex<Peekable<It>>,
  target: Mutex<Option<Target<It::Item>>>,
  requested: AtomicU64,
  cancelled: AtomicBool,
}

impl<It> IterSubscription<It>
where
  It: Iterator,
{
  /// Emits while there is demand. Only the caller that raised the demand from
  /// zero gets here, so emission is never re-entrant.
  fn drain(&self) {
    let target = match self.target.lock().clone() {
      Some(target) => target,
      None => return,
    };
    let mut emitted = 0;
    let mut requested = self.requested.load(Ordering::Acquire);
    loop {
      while requested == UNBOUNDED || emitted != requested {
        if self.cancelled.load(Ordering::Acquire) {
          return;
        }
        let (next, exhausted) = {
          let mut iter = self.iter.lock();
          let next = iter.next();
          (next, iter.peek().is_none())
        };
        if let Some(item) = next {
          if target.deliver(item) {
            emitted += 1;
          }
        }
        if exhausted {
          if !self.cancelled.load(Ordering::Acquire) && self.target.lock().take().is_some() {
            target.complete();
          }
          return;
        }
        requested = self.requested.load(Ordering::Acquire);
      }

      requested = self.requested.load(Ordering::Acquire);
      if requested == emitted {
        requested = self.requested.fetch_sub(emitted, Ordering::AcqRel) - emitted;
        if requested == 0 {
          return;
        }
        emitted = 0;
      }
    }
  }
}

impl<It> Subscription for IterSubscription<It>
where
  It: Iterator + Send,
  It::Item: Send,
{
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    let previous = self
      .requested
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| Some(add_demand(r, n)))
      .unwrap_or_else(|r| r);
    if previous == 0 {
      self.drain();
    }
  }

  fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
    self.target.lock().take();
  }
}

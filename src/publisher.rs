//! Publisher trait and the tap assembly helpers
//!
//! A [`Publisher`] produces items for any number of subscribers, honoring the
//! demand each of them signals through its subscription.

use std::sync::Arc;

use crate::{
  context::Context,
  listener::{FnListenerFactory, SignalListener, SignalListenerFactory},
  ops::tap::Tap,
  subscriber::Subscriber,
};

mod from_iter;
mod trivial;

pub use from_iter::*;
pub use trivial::*;

/// The producer of a stream.
///
/// The trait is object safe so that listener factories can inspect the
/// source they are attached to as a `&dyn Publisher`.
pub trait Publisher {
  type Item;
  type Err;

  /// Starts a new subscription. The subscriber receives `on_subscribe` before
  /// any other signal.
  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Self::Item, Self::Err>>);
}

/// Assembly helpers available on every publisher.
pub trait PublisherExt: Publisher + Sized {
  /// Notifies a per-subscription [`SignalListener`] created by `factory` of
  /// every signal going through the stream.
  ///
  /// The factory's shared state is computed once, right here.
  fn tap<F>(self, factory: F) -> Tap<Self, F>
  where
    F: SignalListenerFactory<Self::Item, Self::Err>,
  {
    Tap::new(self, factory)
  }

  /// Like [`PublisherExt::tap`], creating each listener from the subscriber
  /// context with a closure.
  ///
  /// ```rust
  /// use rxtap::prelude::*;
  ///
  /// #[derive(Default)]
  /// struct CountItems(usize);
  ///
  /// impl SignalListener<i32, std::convert::Infallible> for CountItems {
  ///   fn do_on_next(&mut self, _: &i32) -> HookResult {
  ///     self.0 += 1;
  ///     Ok(())
  ///   }
  /// }
  ///
  /// let subscriber = TestSubscriber::new();
  /// from_iter(vec![1, 2, 3])
  ///   .tap_fn(|_ctx: &Context| CountItems::default())
  ///   .subscribe(subscriber.clone());
  /// assert_eq!(subscriber.values(), vec![1, 2, 3]);
  /// ```
  fn tap_fn<G, L>(self, create: G) -> Tap<Self, FnListenerFactory<G>>
  where
    G: Fn(&Context) -> L + Send + Sync,
    L: SignalListener<Self::Item, Self::Err>,
  {
    Tap::new(self, FnListenerFactory::new(create))
  }
}

impl<P: Publisher> PublisherExt for P {}

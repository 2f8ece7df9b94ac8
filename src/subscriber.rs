//! Subscriber trait and the selective-acceptance capability
//!
//! A [`Subscriber`] is the consumer side of the flow-control protocol. It is
//! handed a [`Subscription`](crate::subscription::Subscription) in
//! `on_subscribe`, receives at most as many items as it requested, and then
//! at most one terminal signal (`on_error` xor `on_complete`).
//!
//! All methods take `&self`: demand and cancellation may be signalled from
//! another thread, or re-entrantly while an item is being delivered, so
//! subscribers keep their state behind interior mutability.

use std::sync::Arc;

use crate::{
  context::Context,
  subscription::{EmptySubscription, SubscriptionRef},
};

// ============================================================================
// Subscriber Trait
// ============================================================================

/// The consumer of a stream.
pub trait Subscriber<Item, Err>: Send + Sync {
  /// Receives the production handle. Called once, before any other signal.
  fn on_subscribe(&self, subscription: SubscriptionRef);

  /// Receives the next item.
  fn on_next(&self, item: Item);

  /// Terminal: the stream failed.
  fn on_error(&self, error: Err);

  /// Terminal: the stream completed.
  fn on_complete(&self);

  /// The context this subscriber carries upstream.
  fn current_context(&self) -> Context { Context::empty() }

  /// The selective-acceptance view of this subscriber, if it has one.
  ///
  /// Producers query this once, when they are wired to the subscriber, and
  /// then use [`ConditionalSubscriber::try_on_next`] for every item.
  fn as_conditional(self: Arc<Self>) -> Option<Arc<dyn ConditionalSubscriber<Item, Err>>> { None }
}

// ============================================================================
// ConditionalSubscriber Trait
// ============================================================================

/// A subscriber able to reject items.
///
/// A rejected item does not consume demand: the producer is free to send the
/// next one right away without waiting for a new request.
pub trait ConditionalSubscriber<Item, Err>: Subscriber<Item, Err> {
  /// Offers an item. Returns `true` if it was consumed, `false` if rejected.
  fn try_on_next(&self, item: Item) -> bool;
}

/// Terminates a subscriber that never got a real subscription: delivers an
/// [`EmptySubscription`] and then `error`.
pub fn error_to<Item, Err>(subscriber: &dyn Subscriber<Item, Err>, error: Err) {
  subscriber.on_subscribe(Arc::new(EmptySubscription));
  subscriber.on_error(error);
}

/// Completes a subscriber that never got a real subscription.
pub fn complete_to<Item, Err>(subscriber: &dyn Subscriber<Item, Err>) {
  subscriber.on_subscribe(Arc::new(EmptySubscription));
  subscriber.on_complete();
}

// ============================================================================
// Tests
// ============================================================================

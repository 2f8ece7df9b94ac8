//! Production handle of a subscription
//!
//! A [`Subscription`] is what a subscriber receives in `on_subscribe`: it is
//! used to signal demand with [`Subscription::request`] and to stop the flow
//! with [`Subscription::cancel`]. Both may be called from any thread, and
//! re-entrantly from within a signal delivery.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

use crate::{error::ProtocolViolation, hooks};

/// Demand meaning "no flow control".
pub const UNBOUNDED: u64 = u64::MAX;

/// Handle used by a consumer to request items or cancel the flow.
pub trait Subscription: Send + Sync {
  /// Adds `n` to the outstanding demand. `n` must be positive.
  fn request(&self, n: u64);

  /// Stops the flow. Further calls are no-ops.
  fn cancel(&self);
}

/// Shared handle handed to subscribers.
pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("dyn Subscription") }
}

/// Checks a demand request, reporting `0` as a dropped protocol violation.
pub fn validate_request(n: u64) -> bool {
  if n == 0 {
    hooks::error_dropped(&ProtocolViolation::NonPositiveRequest(n));
    false
  } else {
    true
  }
}

/// Adds demand, saturating at [`UNBOUNDED`].
#[inline]
pub fn add_demand(current: u64, n: u64) -> u64 { current.saturating_add(n) }

/// Subscription with nothing behind it.
///
/// Used to satisfy the protocol when a subscriber has to be terminated before
/// any upstream exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  #[inline]
  fn request(&self, _: u64) {}

  #[inline]
  fn cancel(&self) {}
}

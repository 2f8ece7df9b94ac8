//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Context and ambient scope
pub use crate::context::Context;
// Errors
pub use crate::error::{BoxError, ListenerError, TapError};
// Global hooks
pub use crate::hooks::Hooks;
// Listener traits
pub use crate::listener::{
  FnListenerFactory, HookResult, NoopListener, SignalListener, SignalListenerFactory, SignalType,
};
// Operators
pub use crate::ops::tap::{Tap, TapSubscriber};
// Core traits and sources
pub use crate::publisher::{empty, from_iter, throw_err, Publisher, PublisherExt};
pub use crate::scope::{current_context, NoopScope, ScopeGuard, ScopeManager, ThreadLocalScope};
pub use crate::subscriber::{ConditionalSubscriber, Subscriber};
pub use crate::subscription::{Subscription, SubscriptionRef, UNBOUNDED};
// Test doubles
pub use crate::testing::{TestPublisher, TestSubscriber};

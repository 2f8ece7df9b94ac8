//! # rxtap: signal listeners for reactive streams
//!
//! Attach side-effecting hooks (metrics, tracing, logging) to every lifecycle
//! event of a backpressure-aware stream subscription, without changing what
//! the stream emits and without letting a faulty hook break the protocol.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxtap::prelude::*;
//!
//! struct Trace;
//!
//! impl SignalListener<i32, std::convert::Infallible> for Trace {
//!   fn do_on_next(&mut self, v: &i32) -> HookResult {
//!     println!("next {v}");
//!     Ok(())
//!   }
//!
//!   fn do_finally(&mut self, signal: SignalType) -> HookResult {
//!     println!("done: {signal}");
//!     Ok(())
//!   }
//! }
//!
//! let subscriber = TestSubscriber::new();
//! from_iter(0..3)
//!   .tap_fn(|_ctx: &Context| Trace)
//!   .subscribe(subscriber.clone());
//! assert_eq!(subscriber.values(), vec![0, 1, 2]);
//! assert!(subscriber.is_completed());
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] / [`Subscriber`] / [`Subscription`] | The demand-driven stream protocol |
//! | [`SignalListener`] | Per-subscription hooks, one per protocol event |
//! | [`SignalListenerFactory`] | Creates a listener for every subscription |
//! | [`Tap`] | The operator running the listener around each signal |
//! | [`ScopeManager`] | Installs the subscription context around every signal |
//! | [`Hooks`] | Where dropped signals and late listener faults end up |
//!
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`SignalListener`]: listener::SignalListener
//! [`SignalListenerFactory`]: listener::SignalListenerFactory
//! [`Tap`]: ops::tap::Tap
//! [`ScopeManager`]: scope::ScopeManager
//! [`Hooks`]: hooks::Hooks
#[cfg(test)]
#[macro_use]
extern crate bencher;

pub mod context;
pub mod error;
pub mod hooks;
pub mod listener;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scope;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use prelude::*;

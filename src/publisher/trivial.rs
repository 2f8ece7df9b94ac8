use std::{convert::Infallible, marker::PhantomData, sync::Arc};

use crate::{
  publisher::Publisher,
  subscriber::{complete_to, error_to, Subscriber},
};

/// Creates a publisher that emits no items, just terminates with an error.
///
/// Every subscriber receives its own clone of `e`.
///
/// # Arguments
///
/// * `e` - An error to emit and terminate with
pub fn throw_err<Item, Err: Clone>(e: Err) -> ThrowErr<Item, Err> { ThrowErr(e, PhantomData) }

pub struct ThrowErr<Item, Err>(Err, PhantomData<fn() -> Item>);

impl<Item, Err: Clone> Clone for ThrowErr<Item, Err> {
  fn clone(&self) -> Self { ThrowErr(self.0.clone(), PhantomData) }
}

impl<Item, Err: Clone> Publisher for ThrowErr<Item, Err> {
  type Item = Item;
  type Err = Err;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Item, Err>>) { error_to(&*subscriber, self.0.clone()) }
}

/// Creates a publisher that produces no values.
///
/// Completes immediately. Never emits an error.
///
/// # Examples
/// ```
/// use rxtap::prelude::*;
///
/// let subscriber = TestSubscriber::<i32, _>::new();
/// empty().subscribe(subscriber.clone());
/// assert!(subscriber.is_completed());
/// ```
pub fn empty<Item>() -> Empty<Item> { Empty(PhantomData) }

pub struct Empty<Item>(PhantomData<fn() -> Item>);

impl<Item> Clone for Empty<Item> {
  fn clone(&self) -> Self { Empty(PhantomData) }
}

impl<Item> Publisher for Empty<Item> {
  type Item = Item;
  type Err = Infallible;

  fn subscribe(&self, subscriber: Arc<dyn Subscriber<Item, Infallible>>) { complete_to(&*subscriber) }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, testing::Signal};

  #[test]
  fn throw_err_terminates_every_subscriber() {
    let source = throw_err::<i32, _>("oops");
    for _ in 0..2 {
      let subscriber = TestSubscriber::new();
      source.subscribe(subscriber.clone());
      assert_eq!(subscriber.signals(), vec![Signal::Subscribe, Signal::Error("oops")]);
    }
  }

  #[test]
  fn empty_completes() {
    let subscriber = TestSubscriber::<(), _>::new();
    empty().subscribe(subscriber.clone());
    assert_eq!(subscriber.signals(), vec![Signal::Subscribe, Signal::Complete]);
  }
}

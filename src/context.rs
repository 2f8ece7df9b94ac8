//! Ambient context carried alongside a subscription
//!
//! A [`Context`] is an immutable key/value snapshot. Every mutation returns a
//! new snapshot and leaves the receiver untouched, so a context can be shared
//! freely between the threads that deliver signals for one subscription.
//!
//! Small contexts (the common case: a trace id, a tenant, a span) are stored
//! inline without a hash map.

use std::{
  any::Any,
  borrow::Cow,
  fmt::{Debug, Formatter},
  sync::Arc,
};

use smallvec::SmallVec;

/// Key of a context entry.
pub type ContextKey = Cow<'static, str>;

type ContextValue = Arc<dyn Any + Send + Sync>;

type Entries = SmallVec<[(ContextKey, ContextValue); 4]>;

/// Immutable key/value snapshot.
///
/// # Examples
///
/// ```rust
/// use rxtap::context::Context;
///
/// let base = Context::of("tenant", "acme");
/// let derived = base.put("trace_id", 42_u64);
///
/// assert_eq!(base.len(), 1);
/// assert_eq!(derived.get::<u64>("trace_id"), Some(&42));
/// assert_eq!(derived.get::<&str>("tenant"), Some(&"acme"));
/// ```
#[derive(Clone, Default)]
pub struct Context {
  entries: Arc<Entries>,
}

impl Context {
  /// A context without any entry.
  pub fn empty() -> Self { Self::default() }

  /// A context holding a single entry.
  pub fn of<K, V>(key: K, value: V) -> Self
  where
    K: Into<ContextKey>,
    V: Any + Send + Sync,
  {
    Self::empty().put(key, value)
  }

  /// Returns a new context where `key` maps to `value`, replacing any previous
  /// value for that key.
  pub fn put<K, V>(&self, key: K, value: V) -> Self
  where
    K: Into<ContextKey>,
    V: Any + Send + Sync,
  {
    let key = key.into();
    let value: ContextValue = Arc::new(value);
    let mut entries: Entries = self.entries.iter().cloned().collect();
    match entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => entries.push((key, value)),
    }
    Self { entries: Arc::new(entries) }
  }

  /// Returns a new context holding the entries of both contexts. Entries of
  /// `other` win on key collisions.
  pub fn put_all(&self, other: &Context) -> Self {
    if other.is_empty() {
      return self.clone();
    }
    if self.is_empty() {
      return other.clone();
    }
    let mut entries: Entries = self
      .entries
      .iter()
      .filter(|(k, _)| !other.has_key(k))
      .cloned()
      .collect();
    entries.extend(other.entries.iter().cloned());
    Self { entries: Arc::new(entries) }
  }

  /// Returns a new context without `key`.
  pub fn delete(&self, key: &str) -> Self {
    if !self.has_key(key) {
      return self.clone();
    }
    let entries = self
      .entries
      .iter()
      .filter(|(k, _)| k != key)
      .cloned()
      .collect();
    Self { entries: Arc::new(entries) }
  }

  /// Looks up `key` and downcasts its value to `V`.
  ///
  /// Returns `None` when the key is absent or holds a value of another type.
  pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .and_then(|(_, v)| v.downcast_ref::<V>())
  }

  /// Like [`Context::get`] but falls back to `default`.
  pub fn get_or<V: Any + Clone>(&self, key: &str, default: V) -> V {
    self.get::<V>(key).cloned().unwrap_or(default)
  }

  pub fn has_key(&self, key: &str) -> bool { self.entries.iter().any(|(k, _)| k == key) }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Keys in insertion order.
  pub fn keys(&self) -> impl Iterator<Item = &str> + '_ { self.entries.iter().map(|(k, _)| &**k) }

  /// Returns a new context restricted to the given keys.
  pub fn retain_keys<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> Self {
    let keys: SmallVec<[&str; 4]> = keys.into_iter().collect();
    let entries = self
      .entries
      .iter()
      .filter(|(k, _)| keys.iter().any(|key| **key == **k))
      .cloned()
      .collect();
    Self { entries: Arc::new(entries) }
  }

  /// `true` if both values are the very same snapshot.
  pub fn ptr_eq(&self, other: &Context) -> bool { Arc::ptr_eq(&self.entries, &other.entries) }
}

impl Debug for Context {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Context")
      .field("keys", &self.keys().collect::<Vec<_>>())
      .finish()
  }
}

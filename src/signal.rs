//! Condition sources.
//!
//! A condition source is anything that holds a current value and calls back
//! on every change, from whatever thread the change happens on. The suspend
//! core only talks to the [`ConditionSource`] trait; [`Signal`] is the
//! in-process implementation used by simulations and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! let beam = Signal::new("beam_mj", 1.0).with_units("mJ");
//!
//! let id = beam.subscribe(Arc::new(|value: &f64| {
//!     println!("beam now {value}");
//! }));
//!
//! beam.put(0.05)?; // callback runs on this thread
//! beam.unsubscribe(id);
//! ```

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Neg;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Identifier returned by [`ConditionSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Change notification callback. May be invoked on any thread.
pub type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// External source of condition values.
pub trait ConditionSource<V>: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// The current value.
    fn get(&self) -> V;

    /// Register `callback` for every change of the value.
    fn subscribe(&self, callback: Callback<V>) -> SubscriptionId;

    /// Remove a callback. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

// =============================================================================
// Signal<V>
// =============================================================================

/// Metadata for a signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalMetadata {
    /// Signal name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Physical units (e.g., "mJ", "Hz")
    pub units: Option<String>,
}

type Validator<V> = Arc<dyn Fn(&V) -> Result<()> + Send + Sync>;

struct SignalInner<V> {
    sender: watch::Sender<V>,
    callbacks: Mutex<BTreeMap<SubscriptionId, Callback<V>>>,
    next_id: AtomicU64,
}

/// A thread-safe value with change callbacks.
///
/// Clones share the same value and subscriber list. Callbacks run
/// synchronously on the thread calling [`Signal::put`], after the new value is
/// stored and without any internal lock held, so a callback may freely read
/// the signal or unsubscribe.
pub struct Signal<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<V>>,
    metadata: SignalMetadata,
    validator: Option<Validator<V>>,
}

impl<V: Clone + Send + Sync + 'static> Clone for Signal<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            metadata: self.metadata.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for Signal<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("metadata", &self.metadata)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<V> Signal<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a signal with an initial value.
    pub fn new(name: impl Into<String>, initial_value: V) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            inner: Arc::new(SignalInner {
                sender,
                callbacks: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
            metadata: SignalMetadata {
                name: name.into(),
                ..SignalMetadata::default()
            },
            validator: None,
        }
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Add units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.metadata.units = Some(units.into());
        self
    }

    /// Reject values for which `validator` fails.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&V) -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Metadata for this signal.
    pub fn metadata(&self) -> &SignalMetadata {
        &self.metadata
    }

    /// The current value.
    pub fn value(&self) -> V {
        self.inner.sender.borrow().clone()
    }

    /// Store `value` and notify every subscriber.
    pub fn put(&self, value: V) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&value)?;
        }

        self.inner.sender.send_replace(value.clone());
        let callbacks: Vec<Callback<V>> = self.inner.callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            callback(&value);
        }
        Ok(())
    }

    /// Async receiver following the value, for tokio-side observers.
    pub fn watch(&self) -> watch::Receiver<V> {
        self.inner.sender.subscribe()
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.inner.callbacks.lock().len()
    }
}

impl<V> Signal<V>
where
    V: Clone + Send + Sync + PartialOrd + Debug + 'static,
{
    /// Add min/max range validation.
    pub fn with_range(self, min: V, max: V) -> Self {
        self.with_validator(move |value: &V| {
            if value < &min || value > &max {
                Err(anyhow!(
                    "Value {:?} out of range [{:?}, {:?}]",
                    value,
                    min,
                    max
                ))
            } else {
                Ok(())
            }
        })
    }
}

impl<V> ConditionSource<V> for Signal<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn get(&self) -> V {
        self.value()
    }

    fn subscribe(&self, callback: Callback<V>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.lock().insert(id, callback);
        debug!(signal = %self.metadata.name, ?id, "subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.callbacks.lock().remove(&id).is_some() {
            debug!(signal = %self.metadata.name, ?id, "unsubscribed");
        }
    }
}

// =============================================================================
// InvertedSource
// =============================================================================

/// Source reporting the negation of another source.
///
/// Handy when a device publishes "ok" levels but a condition is written in
/// terms of "bad" levels, or the reverse.
pub struct InvertedSource<V> {
    inner: Arc<dyn ConditionSource<V>>,
    name: String,
}

impl<V> InvertedSource<V>
where
    V: Neg<Output = V> + Clone + Send + Sync + 'static,
{
    /// Wrap `inner`; the name defaults to `<inner>_inverted`.
    pub fn new(inner: Arc<dyn ConditionSource<V>>) -> Self {
        let name = format!("{}_inverted", inner.name());
        Self { inner, name }
    }

    /// Override the derived name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<V> ConditionSource<V> for InvertedSource<V>
where
    V: Neg<Output = V> + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self) -> V {
        -self.inner.get()
    }

    fn subscribe(&self, callback: Callback<V>) -> SubscriptionId {
        self.inner
            .subscribe(Arc::new(move |value: &V| callback(&-value.clone())))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }
}

// =============================================================================
// SubscriptionGuard
// =============================================================================

/// Unsubscribes from its source when dropped.
///
/// Holding the guard ties a subscription's lifetime to a scope, so it is
/// released on every exit path: normal completion, `?` propagation, panics
/// unwinding, or the owner simply being dropped.
pub struct SubscriptionGuard<V> {
    source: Arc<dyn ConditionSource<V>>,
    id: Option<SubscriptionId>,
}

impl<V> SubscriptionGuard<V> {
    /// Subscribe `callback` to `source` for the lifetime of the guard.
    pub fn subscribe(source: Arc<dyn ConditionSource<V>>, callback: Callback<V>) -> Self {
        let id = source.subscribe(callback);
        Self {
            source,
            id: Some(id),
        }
    }

    /// Release the subscription now. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.source.unsubscribe(id);
        }
    }

    /// Whether the subscription is still held.
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

impl<V> Drop for SubscriptionGuard<V> {
    fn drop(&mut self) {
        self.release();
    }
}

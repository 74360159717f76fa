//! Threshold rendezvous counter.
//!
//! Counts qualifying notifications and resolves a [`RendezvousCell`] once,
//! the first time every tracked tally reaches the target. Without categories
//! there is a single tally; with categories each notification payload is an
//! object and every category key present in it counts once.

use crate::rendezvous::RendezvousCell;
use crate::signal::{ConditionSource, SubscriptionGuard};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the cell resolves with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdReached {
    /// Name of the event that completed the count.
    pub trigger: String,
    /// Per-category tallies at that moment (empty when uncategorized).
    pub tallies: BTreeMap<String, u64>,
    /// Number of events counted.
    pub total: u64,
}

#[derive(Debug, Default)]
struct Tally {
    total: u64,
    per_category: BTreeMap<String, u64>,
}

/// Resolves a cell after `target` qualifying events (per category).
#[derive(Debug)]
pub struct ThresholdCounter {
    target: u64,
    categories: Option<BTreeSet<String>>,
    tally: Mutex<Tally>,
    cell: RendezvousCell<ThresholdReached>,
}

impl ThresholdCounter {
    /// Uncategorized counter.
    pub fn new(target: u64) -> Self {
        Self {
            target,
            categories: None,
            tally: Mutex::new(Tally::default()),
            cell: RendezvousCell::new(),
        }
    }

    /// Counter tracking each of `categories` separately.
    pub fn with_categories<I, S>(target: u64, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: Some(categories.into_iter().map(Into::into).collect()),
            ..Self::new(target)
        }
    }

    /// Count one event. Returns `true` if this call resolved the cell.
    pub fn on_event(&self, name: &str, payload: &Value) -> bool {
        let mut tally = self.tally.lock();

        let reached = match &self.categories {
            None => {
                tally.total += 1;
                tally.total >= self.target
            }
            Some(categories) => {
                let Some(entries) = payload.as_object() else {
                    warn!(event = name, "payload is not an object, ignoring");
                    return false;
                };
                let present: Vec<&String> = categories
                    .iter()
                    .filter(|category| entries.contains_key(category.as_str()))
                    .collect();
                if present.is_empty() {
                    warn!(event = name, "payload has no per-category data, ignoring");
                    return false;
                }

                tally.total += 1;
                for category in present {
                    *tally.per_category.entry(category.clone()).or_default() += 1;
                }
                categories
                    .iter()
                    .all(|category| tally.per_category.get(category).copied().unwrap_or(0) >= self.target)
            }
        };
        debug!(event = name, total = tally.total, "counted event");

        if !reached {
            return false;
        }
        let result = ThresholdReached {
            trigger: name.to_string(),
            tallies: tally.per_category.clone(),
            total: tally.total,
        };
        let resolved = self.cell.resolve(result);
        if resolved {
            info!(event = name, target = self.target, "threshold reached");
        }
        resolved
    }

    /// The cell resolved when the threshold is reached.
    pub fn cell(&self) -> RendezvousCell<ThresholdReached> {
        self.cell.clone()
    }

    /// Current per-category tallies.
    pub fn tallies(&self) -> BTreeMap<String, u64> {
        self.tally.lock().per_category.clone()
    }

    /// Number of events counted so far.
    pub fn total(&self) -> u64 {
        self.tally.lock().total
    }

    /// Count every notification from `source`, named after the source.
    pub fn attach(self: &Arc<Self>, source: Arc<dyn ConditionSource<Value>>) -> SubscriptionGuard<Value> {
        let counter = Arc::clone(self);
        let name = source.name().to_string();
        SubscriptionGuard::subscribe(
            source,
            Arc::new(move |payload: &Value| {
                counter.on_event(&name, payload);
            }),
        )
    }
}

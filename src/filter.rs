//! Bundle-quality gate.
//!
//! [`BundleFilter`] watches the readings that go into a bundle (between
//! `create` and `save`) and, when the bundle is committed, decides whether it
//! is worth keeping. A bundle is dropped instead of saved when its reads took
//! longer than the configured maximum or when any configured per-key
//! predicate flags its buffered value.
//!
//! The duration check runs first. Key predicates run in key order, and keys
//! with no buffered value are skipped.

use crate::error::SuspendResult;
use crate::plan::stubs::drop_bundle;
use crate::plan::{BoxPlan, Command, Msg, MsgProcessor, Plan, PlanMutator, Reply, Step};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Returns `true` for a buffered value that spoils the bundle.
pub type KeyPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Wall clock used to time reads.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct Bundle {
    open: bool,
    values: BTreeMap<String, Value>,
    first_read: Option<DateTime<Utc>>,
    last_read: Option<DateTime<Utc>>,
}

impl Bundle {
    fn reset(&mut self, open: bool) {
        *self = Bundle {
            open,
            ..Bundle::default()
        };
    }

    fn record(&mut self, at: DateTime<Utc>, reading: &Value) {
        if let Some(entries) = reading.as_object() {
            for (key, entry) in entries {
                let value = entry
                    .as_object()
                    .and_then(|reading| reading.get("value"))
                    .unwrap_or(entry);
                self.values.insert(key.clone(), value.clone());
            }
        }
        self.first_read.get_or_insert(at);
        self.last_read = Some(at);
    }
}

#[derive(Clone)]
struct Rules {
    max_duration: Option<Duration>,
    predicates: BTreeMap<String, KeyPredicate>,
    clock: Clock,
}

impl Rules {
    /// Why the bundle must be dropped, if it must.
    fn verdict(&self, bundle: &Bundle) -> Option<String> {
        if let (Some(max), Some(first), Some(last)) =
            (self.max_duration, bundle.first_read, bundle.last_read)
        {
            let span = (last - first).to_std().unwrap_or_default();
            if span > max {
                return Some(format!("reads spanned {span:?}, limit is {max:?}"));
            }
        }

        self.predicates.iter().find_map(|(key, predicate)| {
            let value = bundle.values.get(key)?;
            predicate(value).then(|| format!("bad value for '{key}': {value}"))
        })
    }
}

/// Drops bundles that took too long or contain bad values.
pub struct BundleFilter {
    rules: Rules,
}

impl Default for BundleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleFilter {
    /// Filter that keeps every bundle until rules are added.
    pub fn new() -> Self {
        Self {
            rules: Rules {
                max_duration: None,
                predicates: BTreeMap::new(),
                clock: Arc::new(Utc::now),
            },
        }
    }

    /// Drop bundles whose reads span more than `max`.
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.rules.max_duration = Some(max);
        self
    }

    /// Drop bundles for which `predicate` holds on the value read for `key`.
    pub fn with_predicate<F>(mut self, key: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.rules.predicates.insert(key.into(), Arc::new(predicate));
        self
    }

    /// Drop bundles where `key` reads below `min`.
    pub fn with_minimum(self, key: impl Into<String>, min: f64) -> Self {
        self.with_predicate(key, move |value| value.as_f64().is_some_and(|level| level < min))
    }

    /// Replace the clock used to time reads.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.rules.clock = Arc::new(clock);
        self
    }

    /// Configured maximum bundle duration.
    pub fn max_duration(&self) -> Option<Duration> {
        self.rules.max_duration
    }

    /// Apply the filter to `plan`.
    pub fn wrap<P: Plan + 'static>(&self, plan: P) -> PlanMutator<FilterProcessor> {
        let processor = FilterProcessor {
            rules: Arc::new(self.rules.clone()),
            bundle: Arc::new(Mutex::new(Bundle::default())),
        };
        PlanMutator::new(plan, processor)
    }
}

/// [`MsgProcessor`] behind [`BundleFilter::wrap`].
pub struct FilterProcessor {
    rules: Arc<Rules>,
    bundle: Arc<Mutex<Bundle>>,
}

impl MsgProcessor for FilterProcessor {
    fn process(&mut self, msg: &Msg) -> Option<BoxPlan> {
        match msg.command {
            Command::Read if self.bundle.lock().open => Some(Box::new(RecordRead {
                msg: Some(msg.clone()),
                rules: Arc::clone(&self.rules),
                bundle: Arc::clone(&self.bundle),
            })),
            Command::Save => Some(Box::new(SaveOrDrop {
                save: msg.clone(),
                rules: Arc::clone(&self.rules),
                bundle: Arc::clone(&self.bundle),
                sent: false,
            })),
            _ => None,
        }
    }

    fn emitted(&mut self, msg: &Msg) {
        match msg.command {
            Command::Create => self.bundle.lock().reset(true),
            Command::Save | Command::Drop => self.bundle.lock().reset(false),
            _ => {}
        }
    }
}

/// Forward a read and buffer what it returned.
struct RecordRead {
    msg: Option<Msg>,
    rules: Arc<Rules>,
    bundle: Arc<Mutex<Bundle>>,
}

impl Plan for RecordRead {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        if let Some(msg) = self.msg.take() {
            return Ok(Step::Emit(msg));
        }
        let reply = reply.into_result()?;
        let at = (self.rules.clock)();
        match &reply {
            Reply::Value(reading) => self.bundle.lock().record(at, reading),
            _ => self.bundle.lock().record(at, &Value::Null),
        }
        Ok(Step::Done(reply))
    }
}

/// Issue either the original `save` or a `drop` in its place.
struct SaveOrDrop {
    save: Msg,
    rules: Arc<Rules>,
    bundle: Arc<Mutex<Bundle>>,
    sent: bool,
}

impl Plan for SaveOrDrop {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        if self.sent {
            return Ok(Step::Done(reply.into_result()?));
        }
        self.sent = true;
        let verdict = self.rules.verdict(&self.bundle.lock());
        match verdict {
            Some(reason) => {
                info!(%reason, "dropping bundle instead of saving");
                Ok(Step::Emit(drop_bundle()))
            }
            None => {
                debug!("bundle passed quality checks");
                Ok(Step::Emit(self.save.clone()))
            }
        }
    }
}

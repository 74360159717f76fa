//! Drop-and-retry: discard the half-built bundle and replay it.
//!
//! Every `trigger`, `create` and `read` sent downstream is recorded in a
//! [`ReplayBuffer`]; `save` and `drop` close the bundle and clear it. When the
//! condition goes bad the suspension cycle snapshots the buffer, drops the
//! open bundle (ignoring a failure, there may be none), waits, and then
//! replays the snapshot before the held-back instruction.
//!
//! Replayed instructions go back through the same interceptor, so a reading
//! that goes bad in the middle of a replay starts a nested drop-and-retry.

use super::condition::{BelowThreshold, SuspendCondition};
use super::watcher::{ConditionWatcher, Watched, WatchProcessor, READING_COMMANDS};
use crate::error::SuspendResult;
use crate::plan::stubs::drop_bundle;
use crate::plan::{Command, Msg, MsgPlan, MsgProcessor, Plan, Reply, Step, BoxPlan};
use crate::signal::ConditionSource;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Instructions sent downstream since the last commit boundary.
#[derive(Debug, Default, Clone)]
pub struct ReplayBuffer {
    msgs: Vec<Msg>,
}

impl ReplayBuffer {
    /// Account for an instruction that went downstream.
    pub fn record(&mut self, msg: &Msg) {
        match msg.command {
            Command::Save | Command::Drop => self.msgs.clear(),
            Command::Trigger | Command::Create | Command::Read => self.msgs.push(msg.clone()),
            _ => {}
        }
    }

    /// Copy of the buffered instructions, identities intact.
    pub fn snapshot(&self) -> Vec<Msg> {
        self.msgs.clone()
    }

    /// Forget everything buffered.
    pub fn clear(&mut self) {
        self.msgs.clear();
    }

    /// Number of buffered instructions.
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }
}

/// Emit `drop` once, swallowing a failure.
#[derive(Debug, Default)]
struct TryDrop {
    sent: bool,
}

impl Plan for TryDrop {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        if !self.sent {
            self.sent = true;
            return Ok(Step::Emit(drop_bundle()));
        }
        if let Reply::Failed(err) = reply {
            debug!(%err, "drop failed, no open bundle");
        }
        Ok(Step::Done(Reply::None))
    }
}

/// Watch processor that also feeds the replay buffer.
pub struct ReplayProcessor<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    watch: WatchProcessor<V>,
    buffer: Arc<Mutex<ReplayBuffer>>,
}

impl<V> MsgProcessor for ReplayProcessor<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn process(&mut self, msg: &Msg) -> Option<BoxPlan> {
        self.watch.process(msg)
    }

    fn emitted(&mut self, msg: &Msg) {
        self.buffer.lock().record(msg);
    }
}

/// A condition watcher that drops and replays the open bundle.
pub struct DropAndRetry<V> {
    watcher: ConditionWatcher<V>,
    buffer: Arc<Mutex<ReplayBuffer>>,
}

impl<V> DropAndRetry<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    /// Suspend `trigger`/`create`/`read` while `condition` says so.
    pub fn new(
        source: Arc<dyn ConditionSource<V>>,
        condition: Arc<dyn SuspendCondition<V>>,
        hold_down: Duration,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(ReplayBuffer::default()));
        let pending: Arc<Mutex<Vec<Msg>>> = Arc::new(Mutex::new(Vec::new()));

        let pre_buffer = Arc::clone(&buffer);
        let pre_pending = Arc::clone(&pending);
        let follow_pending = pending;

        let watcher = ConditionWatcher::builder(source, condition)
            .with_commands(READING_COMMANDS)
            .with_hold_down(hold_down)
            .with_pre_plan(move || {
                let snapshot = pre_buffer.lock().snapshot();
                debug!(buffered = snapshot.len(), "dropping open bundle");
                *pre_pending.lock() = snapshot;
                Box::new(TryDrop::default())
            })
            .with_follow_plan(move || {
                let replay = std::mem::take(&mut *follow_pending.lock());
                debug!(count = replay.len(), "replaying bundle");
                Box::new(MsgPlan::new(replay))
            })
            .build();

        Self { watcher, buffer }
    }

    /// Wrap `plan` with drop-and-retry suspension.
    pub fn wrap<P: Plan + 'static>(&self, plan: P) -> SuspendResult<Watched<V, ReplayProcessor<V>>> {
        let processor = ReplayProcessor {
            watch: self.watcher.processor(),
            buffer: Arc::clone(&self.buffer),
        };
        self.watcher.wrap_with(plan, processor)
    }

    /// The underlying watcher.
    pub fn watcher(&self) -> &ConditionWatcher<V> {
        &self.watcher
    }

    /// Instructions currently buffered for replay.
    pub fn buffered(&self) -> Vec<Msg> {
        self.buffer.lock().snapshot()
    }
}

impl<V> DropAndRetry<V>
where
    V: super::condition::ConditionValue + Clone + Debug + Send + Sync + 'static,
{
    /// Drop-and-retry while the beam is below `min_beam`.
    pub fn beam_drop(source: Arc<dyn ConditionSource<V>>, min_beam: f64, hold_down: Duration) -> Self {
        Self::new(source, Arc::new(BelowThreshold::new(min_beam)), hold_down)
    }
}

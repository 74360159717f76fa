//! Condition watcher and the suspend cycle it splices into plans.
//!
//! # State machine
//!
//! ```text
//!            should_suspend(v)
//!   Running ──────────────────▶ Suspended
//!      ▲                            │ should_resume(v)
//!      │  hold-down elapsed,        ▼
//!      │  state re-checked     hold-down pending ──should_suspend(v)──▶ Suspended
//!      └───────────────────────────┘
//! ```
//!
//! Every transition happens under one reentrant lock. A resume bumps a
//! generation counter and starts a [`HoldDownTimer`]; when it elapses the
//! worker takes the lock and resolves the rendezvous cell only if the watcher
//! is still running *and* no newer resume has been started since.
//!
//! # Interception
//!
//! [`ConditionWatcher::wrap`] returns a plan in which every watched
//! instruction that arrives while the cell is unresolved (and no suspension
//! is already being handled) is replaced by:
//!
//! ```text
//! pre_plan → wait(cell) → [block] → post_plan → follow_plan → original
//! ```
//!
//! `follow_plan` runs after handling has ended, so its instructions can start
//! a nested suspension of their own.

use super::condition::{BelowThreshold, ConditionValue, SuspendCondition};
use super::holddown::HoldDownTimer;
use crate::error::{SuspendError, SuspendResult};
use crate::plan::stubs::wait_for;
use crate::plan::{BoxPlan, Command, Msg, MsgPlan, MsgProcessor, Plan, PlanMutator, Reply, Step};
use crate::rendezvous::RendezvousCell;
use crate::signal::{ConditionSource, SubscriptionGuard};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Zero-argument constructor for a sub-plan.
pub type PlanFactory = Arc<dyn Fn() -> BoxPlan + Send + Sync>;

/// Commands that take or assemble a reading.
pub const READING_COMMANDS: [Command; 3] = [Command::Trigger, Command::Create, Command::Read];

/// Default hold-down for beam suspenders.
pub const DEFAULT_BEAM_HOLD_DOWN: Duration = Duration::from_secs(5);

fn empty_plan() -> PlanFactory {
    Arc::new(|| Box::new(MsgPlan::empty()))
}

struct WatchState {
    suspended: bool,
    handling: bool,
    generation: u64,
    cell: RendezvousCell<()>,
    timer: Option<HoldDownTimer>,
}

/// Shared core of a watcher: configuration plus lock-guarded state.
pub(crate) struct WatcherCore<V> {
    source_name: String,
    condition: Arc<dyn SuspendCondition<V>>,
    commands: Option<BTreeSet<Command>>,
    hold_down: Duration,
    pre_plan: PlanFactory,
    post_plan: PlanFactory,
    follow_plan: PlanFactory,
    state: ReentrantMutex<RefCell<WatchState>>,
}

impl<V> WatcherCore<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn watches(&self, command: &Command) -> bool {
        self.commands
            .as_ref()
            .map_or(true, |commands| commands.contains(command))
    }

    fn on_condition_changed(self: &Arc<Self>, value: &V) -> SuspendResult<()> {
        let core: Weak<Self> = Arc::downgrade(self);
        let hold_down = self.hold_down;
        self.transition(value, move |generation| {
            HoldDownTimer::start(hold_down, move || {
                if let Some(core) = core.upgrade() {
                    core.release(generation);
                }
            })
        })
    }

    /// Apply `value` to the state machine. `start_timer` starts the
    /// hold-down for the given generation; state only changes once it has.
    fn transition<S>(&self, value: &V, start_timer: S) -> SuspendResult<()>
    where
        S: FnOnce(u64) -> SuspendResult<HoldDownTimer>,
    {
        let guard = self.state.lock();
        let suspended = guard.borrow().suspended;

        if suspended {
            if self.condition.should_resume(value)? {
                let generation = guard.borrow().generation + 1;
                let timer = start_timer(generation)?;
                info!(
                    source = %self.source_name,
                    hold_down = ?self.hold_down,
                    "suspension is over, waiting for hold-down then resuming"
                );
                let mut state = guard.borrow_mut();
                state.suspended = false;
                state.generation = generation;
                state.timer = Some(timer);
            }
        } else if self.condition.should_suspend(value)? {
            info!(source = %self.source_name, ?value, "Suspending due to bad value");
            let mut state = guard.borrow_mut();
            state.suspended = true;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            if state.cell.is_resolved() {
                state.cell = RendezvousCell::new();
            }
        }
        Ok(())
    }

    fn release(&self, generation: u64) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.suspended || state.generation != generation {
            debug!(
                source = %self.source_name,
                generation,
                current = state.generation,
                "stale hold-down, not releasing"
            );
            return;
        }
        state.timer = None;
        if state.cell.resolve(()) {
            info!(source = %self.source_name, "hold-down complete, releasing plan");
        }
    }

    /// Claim the current suspension for `msg`, if it must wait.
    fn try_begin(&self, msg: &Msg) -> Option<RendezvousCell<()>> {
        if !self.watches(&msg.command) {
            return None;
        }
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.cell.is_resolved() || state.handling {
            return None;
        }
        state.handling = true;
        Some(state.cell.clone())
    }

    fn end_handling(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().handling = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Wait,
    Blocked,
    Post,
    Follow,
    Reemit,
    Finish,
}

/// The sub-plan substituted for a held-back instruction.
struct SuspendCycle<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    core: Arc<WatcherCore<V>>,
    msg: Msg,
    cell: RendezvousCell<()>,
    phase: Phase,
    current: Option<BoxPlan>,
    handling: bool,
}

impl<V> SuspendCycle<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn new(core: Arc<WatcherCore<V>>, msg: Msg, cell: RendezvousCell<()>) -> Self {
        Self {
            core,
            msg,
            cell,
            phase: Phase::Pre,
            current: None,
            handling: true,
        }
    }

    /// Run the sub-plan for the current phase one step.
    fn drive(&mut self, reply: Reply, factory: fn(&WatcherCore<V>) -> &PlanFactory) -> SuspendResult<Option<Msg>> {
        let core = &self.core;
        let plan = self.current.get_or_insert_with(|| factory(core)());
        match plan.advance(reply)? {
            Step::Emit(msg) => Ok(Some(msg)),
            Step::Done(_) => {
                self.current = None;
                Ok(None)
            }
        }
    }

    fn finish_handling(&mut self) {
        if self.handling {
            self.handling = false;
            self.core.end_handling();
        }
    }
}

impl<V> Plan for SuspendCycle<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        let mut reply = reply;
        loop {
            match self.phase {
                Phase::Pre => match self.drive(reply, |core| &core.pre_plan)? {
                    Some(msg) => return Ok(Step::Emit(msg)),
                    None => {
                        self.phase = Phase::Wait;
                        reply = Reply::None;
                    }
                },
                Phase::Wait => {
                    self.phase = Phase::Blocked;
                    return Ok(Step::Emit(wait_for(self.cell.clone())));
                }
                Phase::Blocked => {
                    reply.into_result()?;
                    debug!(msg = %self.msg, "waiting for condition to recover");
                    self.cell.wait();
                    self.phase = Phase::Post;
                    reply = Reply::None;
                }
                Phase::Post => match self.drive(reply, |core| &core.post_plan)? {
                    Some(msg) => return Ok(Step::Emit(msg)),
                    None => {
                        info!(source = %self.core.source_name, "Resuming plan");
                        self.finish_handling();
                        self.phase = Phase::Follow;
                        reply = Reply::None;
                    }
                },
                Phase::Follow => match self.drive(reply, |core| &core.follow_plan)? {
                    Some(msg) => return Ok(Step::Emit(msg)),
                    None => {
                        self.phase = Phase::Reemit;
                        reply = Reply::None;
                    }
                },
                Phase::Reemit => {
                    self.phase = Phase::Finish;
                    return Ok(Step::Emit(self.msg.clone()));
                }
                Phase::Finish => return Ok(Step::Done(reply.into_result()?)),
            }
        }
    }
}

impl<V> Drop for SuspendCycle<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Aborted or failed before post_plan finished
        self.finish_handling();
    }
}

/// [`MsgProcessor`] that holds back watched instructions while suspended.
pub struct WatchProcessor<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    core: Arc<WatcherCore<V>>,
}

impl<V> MsgProcessor for WatchProcessor<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn process(&mut self, msg: &Msg) -> Option<BoxPlan> {
        let cell = self.core.try_begin(msg)?;
        debug!(%msg, "suspending before instruction");
        Some(Box::new(SuspendCycle::new(
            Arc::clone(&self.core),
            msg.clone(),
            cell,
        )))
    }
}

/// A plan under a watcher's control.
///
/// Holds the watcher's subscription to its condition source; the
/// subscription is released once the plan is exhausted or fails, and in any
/// case when this value is dropped.
pub struct Watched<V, M> {
    inner: PlanMutator<M>,
    subscription: SubscriptionGuard<V>,
}

impl<V, M> Watched<V, M> {
    /// Whether the condition source subscription is still held.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// The underlying mutator.
    pub fn mutator(&self) -> &PlanMutator<M> {
        &self.inner
    }
}

impl<V, M> Plan for Watched<V, M>
where
    V: Send + 'static,
    M: MsgProcessor,
{
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        let result = self.inner.advance(reply);
        if matches!(result, Ok(Step::Done(_)) | Err(_)) {
            self.subscription.release();
        }
        result
    }
}

/// Builder for [`ConditionWatcher`].
pub struct WatcherBuilder<V> {
    source: Arc<dyn ConditionSource<V>>,
    condition: Arc<dyn SuspendCondition<V>>,
    commands: Option<BTreeSet<Command>>,
    hold_down: Duration,
    pre_plan: PlanFactory,
    post_plan: PlanFactory,
    follow_plan: PlanFactory,
}

impl<V> WatcherBuilder<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    /// Only suspend on these commands (default: every command).
    pub fn with_commands<I, C>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Command>,
    {
        self.commands = Some(commands.into_iter().map(Into::into).collect());
        self
    }

    /// Time the condition must stay good before the plan resumes.
    pub fn with_hold_down(mut self, hold_down: Duration) -> Self {
        self.hold_down = hold_down;
        self
    }

    /// Plan run as soon as a suspension starts.
    pub fn with_pre_plan<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoxPlan + Send + Sync + 'static,
    {
        self.pre_plan = Arc::new(factory);
        self
    }

    /// Plan run once the condition has recovered, before normal flow resumes.
    pub fn with_post_plan<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoxPlan + Send + Sync + 'static,
    {
        self.post_plan = Arc::new(factory);
        self
    }

    /// Plan run after the suspension ends; may itself be suspended.
    pub fn with_follow_plan<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoxPlan + Send + Sync + 'static,
    {
        self.follow_plan = Arc::new(factory);
        self
    }

    /// Finish building.
    pub fn build(self) -> ConditionWatcher<V> {
        let core = WatcherCore {
            source_name: self.source.name().to_string(),
            condition: self.condition,
            commands: self.commands,
            hold_down: self.hold_down,
            pre_plan: self.pre_plan,
            post_plan: self.post_plan,
            follow_plan: self.follow_plan,
            state: ReentrantMutex::new(RefCell::new(WatchState {
                suspended: false,
                handling: false,
                generation: 0,
                cell: RendezvousCell::resolved(()),
                timer: None,
            })),
        };
        ConditionWatcher {
            source: self.source,
            core: Arc::new(core),
        }
    }
}

/// Watches a condition source and suspends plans while it reports bad values.
pub struct ConditionWatcher<V> {
    source: Arc<dyn ConditionSource<V>>,
    core: Arc<WatcherCore<V>>,
}

impl<V> ConditionWatcher<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    /// Start building a watcher over `source`.
    pub fn builder(
        source: Arc<dyn ConditionSource<V>>,
        condition: Arc<dyn SuspendCondition<V>>,
    ) -> WatcherBuilder<V> {
        WatcherBuilder {
            source,
            condition,
            commands: None,
            hold_down: Duration::ZERO,
            pre_plan: empty_plan(),
            post_plan: empty_plan(),
            follow_plan: empty_plan(),
        }
    }

    /// Feed a value as if the source had reported it.
    ///
    /// Safe to call from any thread, concurrently with plan consumption.
    pub fn on_condition_changed(&self, value: &V) -> SuspendResult<()> {
        self.core.on_condition_changed(value)
    }

    /// Wrap `plan` so that watched instructions wait out suspensions.
    ///
    /// Subscribes to the source and evaluates its current value right away;
    /// a condition that was never implemented fails here.
    pub fn wrap<P: Plan + 'static>(&self, plan: P) -> SuspendResult<Watched<V, WatchProcessor<V>>> {
        self.wrap_with(plan, self.processor())
    }

    pub(crate) fn processor(&self) -> WatchProcessor<V> {
        WatchProcessor {
            core: Arc::clone(&self.core),
        }
    }

    pub(crate) fn wrap_with<P, M>(&self, plan: P, processor: M) -> SuspendResult<Watched<V, M>>
    where
        P: Plan + 'static,
        M: MsgProcessor,
    {
        debug!(source = %self.core.source_name, "running plan with suspender");
        let core = Arc::downgrade(&self.core);
        let subscription = SubscriptionGuard::subscribe(
            Arc::clone(&self.source),
            Arc::new(move |value: &V| {
                let Some(core) = core.upgrade() else {
                    return;
                };
                if let Err(err) = core.on_condition_changed(value) {
                    warn!(source = %core.source_name, %err, "ignoring notification");
                }
            }),
        );

        match self.core.on_condition_changed(&self.source.get()) {
            Err(err @ SuspendError::Unimplemented(_)) => return Err(err),
            Err(err) => warn!(source = %self.core.source_name, %err, "ignoring initial value"),
            Ok(()) => {}
        }

        Ok(Watched {
            inner: PlanMutator::new(plan, processor),
            subscription,
        })
    }

    /// Whether the condition is currently bad.
    pub fn is_suspended(&self) -> bool {
        self.core.state.lock().borrow().suspended
    }

    /// Whether a suspension is being handled (between pre_plan and the end
    /// of post_plan).
    pub fn is_handling(&self) -> bool {
        self.core.state.lock().borrow().handling
    }

    /// The cell plans wait on; resolved while running normally.
    pub fn current_cell(&self) -> RendezvousCell<()> {
        self.core.state.lock().borrow().cell.clone()
    }

    /// Name of the watched source.
    pub fn source_name(&self) -> &str {
        &self.core.source_name
    }

    /// Configured hold-down.
    pub fn hold_down(&self) -> Duration {
        self.core.hold_down
    }

    /// Whether instructions with `command` can be held back.
    pub fn watches(&self, command: &Command) -> bool {
        self.core.watches(command)
    }
}

impl<V> ConditionWatcher<V>
where
    V: ConditionValue + Clone + Debug + Send + Sync + 'static,
{
    /// Suspend readings while the beam level is below `min_beam`.
    pub fn beam(source: Arc<dyn ConditionSource<V>>, min_beam: f64, hold_down: Duration) -> Self {
        Self::builder(source, Arc::new(BelowThreshold::new(min_beam)))
            .with_commands(READING_COMMANDS)
            .with_hold_down(hold_down)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::stubs::{null, read, sleep};
    use crate::plan::{collect_msgs, Command};
    use crate::signal::Signal;
    use crate::suspend::condition::{BaseCondition, NonZero};
    use tracing_test::traced_test;

    fn non_zero(sig: &Signal<i64>) -> WatcherBuilder<i64> {
        ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
    }

    fn next_cmd<P: Plan>(plan: &mut P) -> Command {
        match plan.advance(Reply::None).unwrap() {
            Step::Emit(msg) => msg.command,
            Step::Done(_) => panic!("plan finished early"),
        }
    }

    #[test]
    fn test_no_suspension_is_identity() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).build();
        let msgs = vec![sleep(1.0), read("det"), sleep(1.0)];
        let uids: Vec<_> = msgs.iter().map(Msg::uid).collect();

        let mut plan = watcher.wrap(MsgPlan::new(msgs)).unwrap();
        let out: Vec<_> = collect_msgs(&mut plan).unwrap().iter().map(Msg::uid).collect();
        assert_eq!(out, uids);
    }

    #[test]
    fn test_state_transitions() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).build();
        assert!(!watcher.is_suspended());
        assert!(watcher.current_cell().is_resolved());

        watcher.on_condition_changed(&1).unwrap();
        assert!(watcher.is_suspended());
        let cell = watcher.current_cell();
        assert!(!cell.is_resolved());

        // Already suspended: another bad value changes nothing
        watcher.on_condition_changed(&2).unwrap();
        assert!(watcher.current_cell().same_cell(&cell));

        watcher.on_condition_changed(&0).unwrap();
        assert!(!watcher.is_suspended());
        assert!(cell.wait_timeout(Duration::from_secs(2)).is_some());

        // Second resume after resolution is a no-op
        watcher.on_condition_changed(&0).unwrap();
        assert!(watcher.current_cell().same_cell(&cell));
    }

    #[test]
    fn test_suspend_during_hold_down_reuses_cell() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).with_hold_down(Duration::from_secs(5)).build();
        watcher.on_condition_changed(&1).unwrap();
        let cell = watcher.current_cell();
        watcher.on_condition_changed(&0).unwrap();
        watcher.on_condition_changed(&1).unwrap();
        assert!(watcher.current_cell().same_cell(&cell));
        assert!(!cell.is_resolved());
    }

    #[test]
    fn test_failed_hold_down_start_stays_suspended() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).build();
        watcher.on_condition_changed(&1).unwrap();
        let cell = watcher.current_cell();

        let result = watcher.core.transition(&0, |_| {
            Err(SuspendError::Io(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "cannot spawn worker",
            )))
        });
        assert!(matches!(result, Err(SuspendError::Io(_))));
        assert!(watcher.is_suspended());
        assert!(!cell.is_resolved());

        // The next good value still resumes
        watcher.on_condition_changed(&0).unwrap();
        assert!(cell.wait_timeout(Duration::from_secs(2)).is_some());
    }

    #[test]
    fn test_unimplemented_condition_fails_wrap() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(BaseCondition)).build();
        let result = watcher.wrap(MsgPlan::new(vec![null()]));
        assert!(matches!(result, Err(SuspendError::Unimplemented(_))));
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn test_suspend_basic_sequence() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig)
            .with_pre_plan(|| Box::new(MsgPlan::new(vec![null()])))
            .with_post_plan(|| Box::new(MsgPlan::new(vec![null()])))
            .with_follow_plan(|| Box::new(MsgPlan::new(vec![null()])))
            .build();
        let mut plan = watcher
            .wrap(MsgPlan::new(vec![sleep(1.0), sleep(1.0), sleep(1.0)]))
            .unwrap();

        assert_eq!(next_cmd(&mut plan), Command::Sleep);
        sig.put(1).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Null); // pre
        assert_eq!(next_cmd(&mut plan), Command::Wait);
        assert!(watcher.is_handling());
        sig.put(0).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Null); // post
        assert!(watcher.is_handling());
        assert_eq!(next_cmd(&mut plan), Command::Null); // follow
        assert!(!watcher.is_handling());
        assert_eq!(next_cmd(&mut plan), Command::Sleep);
        assert_eq!(next_cmd(&mut plan), Command::Sleep);
        assert!(matches!(plan.advance(Reply::None).unwrap(), Step::Done(_)));
        assert!(!plan.is_subscribed());
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn test_suspend_only_on_watched_commands() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).with_commands(["set"]).build();
        let mut plan = watcher
            .wrap(MsgPlan::new(vec![
                sleep(1.0),
                sleep(1.0),
                sleep(1.0),
                crate::plan::stubs::set("sig", 0),
            ]))
            .unwrap();

        sig.put(1).unwrap();
        for _ in 0..3 {
            assert_eq!(next_cmd(&mut plan), Command::Sleep);
        }
        assert_eq!(next_cmd(&mut plan), Command::Wait);
        sig.put(0).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Set);
        assert!(matches!(plan.advance(Reply::None).unwrap(), Step::Done(_)));
    }

    #[test]
    fn test_initially_bad_value_suspends_at_wrap() {
        let sig = Signal::new("sig", 1_i64);
        let watcher = non_zero(&sig).build();
        let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(1.0)])).unwrap();
        assert!(watcher.is_suspended());
        assert_eq!(next_cmd(&mut plan), Command::Wait);
        sig.put(0).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Sleep);
    }

    #[test]
    fn test_dropping_plan_releases_subscription() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig).build();
        let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(1.0), sleep(1.0)])).unwrap();
        assert_eq!(sig.subscriber_count(), 1);
        assert_eq!(next_cmd(&mut plan), Command::Sleep);
        drop(plan);
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn test_failing_post_plan_propagates() {
        let sig = Signal::new("sig", 0_i64);
        let watcher = non_zero(&sig)
            .with_post_plan(|| Box::new(MsgPlan::new(vec![null()])))
            .build();
        let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(1.0)])).unwrap();

        sig.put(1).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Wait);
        sig.put(0).unwrap();
        assert_eq!(next_cmd(&mut plan), Command::Null);
        let result = plan.advance(Reply::Failed(SuspendError::executor("null", "boom")));
        assert!(matches!(result, Err(SuspendError::Executor { .. })));
        assert!(!watcher.is_handling());
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn test_beam_preset_watches_readings() {
        let sig = Signal::new("beam", 1.0_f64);
        let watcher = ConditionWatcher::beam(Arc::new(sig), 0.1, Duration::ZERO);
        assert!(watcher.watches(&Command::Read));
        assert!(watcher.watches(&Command::Trigger));
        assert!(!watcher.watches(&Command::Save));
        assert!(!watcher.watches(&Command::Set));
    }

    #[test]
    #[traced_test]
    fn test_malformed_notification_is_ignored() {
        let sig = Signal::new("beam", serde_json::json!(1.0));
        let watcher = ConditionWatcher::beam(Arc::new(sig.clone()), 0.1, Duration::ZERO);
        let _plan = watcher.wrap(MsgPlan::new(vec![read("det")])).unwrap();

        sig.put(serde_json::json!("offline")).unwrap();
        assert!(!watcher.is_suspended());
        assert!(logs_contain("ignoring notification"));

        sig.put(serde_json::json!(0.01)).unwrap();
        assert!(watcher.is_suspended());
        sig.put(serde_json::json!({"garbled": true})).unwrap();
        assert!(watcher.is_suspended());
    }
}

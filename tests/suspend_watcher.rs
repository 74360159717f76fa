//! Integration tests for the condition watcher and its stream interceptor.

mod common;

use common::{assert_hold_down, commands, env_timing_tolerance, run_recorded, tag, tagged};
use daq_suspend::plan::stubs::{read, sleep, trigger};
use daq_suspend::suspend::{ConditionWatcher, NonZero, SuspendCondition};
use daq_suspend::{BoxPlan, Command, Msg, MsgPlan, Plan, Reply, Signal, Step, SuspendError, SuspendResult};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn tagged_plan(tag: &'static str) -> impl Fn() -> BoxPlan + Send + Sync + 'static {
    move || -> BoxPlan { Box::new(MsgPlan::new(vec![tagged(tag)])) }
}

fn flag() -> Signal<i64> {
    Signal::new("fault_flag", 0_i64)
}

#[test]
fn test_no_bad_value_passes_stream_through() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_pre_plan(tagged_plan("pre"))
        .build();
    let msgs = vec![trigger("det"), read("det"), sleep(0.1), read("det")];
    let expected: Vec<_> = msgs.iter().map(Msg::uid).collect();

    let mut plan = watcher.wrap(MsgPlan::new(msgs)).unwrap();
    let (seen, result) = run_recorded(&mut plan, |_, _| Reply::None);
    assert!(result.is_ok());
    assert_eq!(seen.iter().map(Msg::uid).collect::<Vec<_>>(), expected);
}

#[test]
fn test_cycle_runs_pre_wait_post_follow_then_original() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_pre_plan(tagged_plan("pre"))
        .with_post_plan(tagged_plan("post"))
        .with_follow_plan(tagged_plan("follow"))
        .build();
    let original = sleep(1.0);
    let mut plan = watcher
        .wrap(MsgPlan::new(vec![sleep(1.0), original.clone()]))
        .unwrap();

    let (seen, result) = run_recorded(&mut plan, |index, msg| {
        if index == 0 {
            sig.put(1).unwrap();
        }
        if msg.command == Command::Wait {
            sig.put(0).unwrap();
        }
        Reply::None
    });
    assert!(result.is_ok());

    let tags: Vec<Option<&str>> = seen.iter().map(tag).collect();
    assert_eq!(
        tags,
        vec![None, Some("pre"), None, Some("post"), Some("follow"), None]
    );
    assert_eq!(seen[2].command, Command::Wait);
    assert!(seen[2].rendezvous().is_some());
    assert!(seen[5].is_same(&original));
}

#[test]
fn test_three_reads_flip_before_second() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_commands([Command::Trigger, Command::Read])
        .with_pre_plan(tagged_plan("pre"))
        .with_post_plan(tagged_plan("post"))
        .with_follow_plan(tagged_plan("follow"))
        .build();
    let reads = vec![read("det"), read("det"), read("det")];
    let uids: Vec<_> = reads.iter().map(Msg::uid).collect();
    let mut plan = watcher.wrap(MsgPlan::new(reads)).unwrap();

    let (seen, result) = run_recorded(&mut plan, |index, msg| {
        if index == 0 {
            sig.put(1).unwrap();
        }
        if msg.command == Command::Wait {
            sig.put(0).unwrap();
        }
        Reply::Value(serde_json::json!({"det": index}))
    });
    assert!(result.is_ok());

    assert_eq!(
        commands(&seen),
        vec![
            Command::Read,
            Command::Null,
            Command::Wait,
            Command::Null,
            Command::Null,
            Command::Read,
            Command::Read
        ]
    );
    let read_uids: Vec<_> = seen
        .iter()
        .filter(|msg| msg.command == Command::Read)
        .map(Msg::uid)
        .collect();
    assert_eq!(read_uids, uids);
}

#[test]
fn test_bad_value_during_follow_starts_nested_cycle() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_pre_plan(tagged_plan("pre"))
        .with_post_plan(tagged_plan("post"))
        .with_follow_plan(tagged_plan("follow"))
        .build();
    let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(1.0)])).unwrap();

    sig.put(1).unwrap();
    let mut relapsed = false;
    let (seen, result) = run_recorded(&mut plan, |_, msg| {
        match (msg.command.clone(), tag(msg)) {
            (Command::Wait, _) => sig.put(0).unwrap(),
            // Goes bad again right after the first recovery
            (_, Some("post")) if !relapsed => {
                relapsed = true;
                sig.put(1).unwrap();
            }
            _ => {}
        }
        Reply::None
    });
    assert!(result.is_ok());

    let labels: Vec<String> = seen
        .iter()
        .map(|msg| tag(msg).map_or_else(|| msg.command.to_string(), str::to_string))
        .collect();
    assert_eq!(
        labels,
        vec!["pre", "wait", "post", "pre", "wait", "post", "follow", "follow", "sleep"]
    );
    assert!(!watcher.is_handling());
}

#[test]
fn test_hold_down_cancelled_by_new_bad_value() {
    let hold_down = Duration::from_millis(200);
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_hold_down(hold_down)
        .build();
    let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();
    sig.put(1).unwrap();

    let consumer = thread::spawn(move || {
        let (seen, result) = run_recorded(&mut plan, |_, _| Reply::None);
        (commands(&seen), result.is_ok(), Instant::now())
    });

    sig.put(0).unwrap();
    thread::sleep(Duration::from_millis(60));
    sig.put(1).unwrap();

    // Well past the first hold-down: still blocked
    thread::sleep(Duration::from_millis(300));
    assert!(!watcher.current_cell().is_resolved());
    assert!(!consumer.is_finished());

    sig.put(0).unwrap();
    let resumed = Instant::now();
    let (cmds, ok, finished) = consumer.join().unwrap();
    assert!(ok);
    assert_eq!(cmds, vec![Command::Wait, Command::Sleep]);
    assert_hold_down(
        finished.duration_since(resumed),
        hold_down,
        env_timing_tolerance(),
        "uninterrupted hold-down",
    );
}

#[test]
fn test_double_flip_within_hold_down_never_resolves_early() {
    let hold_down = Duration::from_millis(150);
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_hold_down(hold_down)
        .build();
    let _plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();

    sig.put(1).unwrap();
    let cell = watcher.current_cell();

    // First hold-down would elapse 40ms after the final resume below
    sig.put(0).unwrap();
    thread::sleep(Duration::from_millis(100));
    sig.put(1).unwrap();
    thread::sleep(Duration::from_millis(10));
    sig.put(0).unwrap();
    let last_resume = Instant::now();

    assert!(watcher.current_cell().same_cell(&cell));
    assert!(cell.wait_timeout(Duration::from_secs(2)).is_some());
    assert_hold_down(
        last_resume.elapsed(),
        hold_down,
        env_timing_tolerance(),
        "hold-down after double flip",
    );
}

#[test]
fn test_rapid_flips_ending_bad_stay_suspended() {
    let hold_down = Duration::from_millis(50);
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_hold_down(hold_down)
        .build();
    let _plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();

    sig.put(1).unwrap();
    let cell = watcher.current_cell();
    for _ in 0..50 {
        sig.put(0).unwrap();
        sig.put(1).unwrap();
    }

    assert!(cell.wait_timeout(hold_down * 4).is_none());
    assert!(watcher.is_suspended());
    assert!(watcher.current_cell().same_cell(&cell));
}

#[test]
fn test_second_resume_after_resolution_is_noop() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero)).build();
    let _plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();

    sig.put(1).unwrap();
    let cell = watcher.current_cell();
    sig.put(0).unwrap();
    assert!(cell.wait_timeout(Duration::from_secs(2)).is_some());

    sig.put(0).unwrap();
    assert!(watcher.current_cell().same_cell(&cell));
    assert!(!watcher.is_suspended());
}

#[test]
fn test_subscription_released_on_every_exit_path() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero)).build();

    // Exhaustion
    let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();
    assert_eq!(sig.subscriber_count(), 1);
    let (_, result) = run_recorded(&mut plan, |_, _| Reply::None);
    assert!(result.is_ok());
    assert_eq!(sig.subscriber_count(), 0);

    // Error from the executor
    let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0), sleep(0.0)])).unwrap();
    let (seen, result) = run_recorded(&mut plan, |_, msg| {
        Reply::Failed(SuspendError::executor(&msg.command, "interrupted"))
    });
    assert_eq!(seen.len(), 1);
    assert!(matches!(result, Err(SuspendError::Executor { .. })));
    assert_eq!(sig.subscriber_count(), 0);

    // Abort: the consumer just stops and drops the plan
    let plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();
    assert_eq!(sig.subscriber_count(), 1);
    drop(plan);
    assert_eq!(sig.subscriber_count(), 0);
}

struct Forgetful;

impl SuspendCondition<i64> for Forgetful {}

#[test]
fn test_condition_without_should_suspend_fails_at_wrap() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(Forgetful)).build();
    match watcher.wrap(MsgPlan::new(vec![sleep(0.0)])) {
        Err(SuspendError::Unimplemented(op)) => assert_eq!(op, "should_suspend"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("wrap should fail"),
    }
    assert_eq!(sig.subscriber_count(), 0);
}

#[test]
fn test_error_in_post_plan_reaches_consumer() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_post_plan(tagged_plan("post"))
        .build();
    let mut plan = watcher.wrap(MsgPlan::new(vec![sleep(0.0)])).unwrap();
    sig.put(1).unwrap();

    let (seen, result) = run_recorded(&mut plan, |_, msg| match (msg.command.clone(), tag(msg)) {
        (Command::Wait, _) => {
            sig.put(0).unwrap();
            Reply::None
        }
        (_, Some("post")) => Reply::Failed(SuspendError::Plan("restore failed".into())),
        _ => Reply::None,
    });
    assert_eq!(commands(&seen), vec![Command::Wait, Command::Null]);
    assert!(matches!(result, Err(SuspendError::Plan(_))));
    assert!(!watcher.is_handling());
}

/// Yields `msg`, and yields it again if the first attempt failed.
struct RetryOnFailure {
    msg: Msg,
    attempts: usize,
}

impl Plan for RetryOnFailure {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        self.attempts += 1;
        match (self.attempts, reply) {
            (1, _) | (2, Reply::Failed(_)) => Ok(Step::Emit(self.msg.clone())),
            (_, reply) => Ok(Step::Done(reply.into_result()?)),
        }
    }
}

#[test]
fn test_retried_instruction_waits_out_new_suspension() {
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_post_plan(tagged_plan("post"))
        .build();
    let root = RetryOnFailure {
        msg: read("det"),
        attempts: 0,
    };
    let mut plan = watcher.wrap(root).unwrap();
    sig.put(1).unwrap();

    let mut relapsed = false;
    let (seen, result) = run_recorded(&mut plan, |_, msg| match (msg.command.clone(), tag(msg)) {
        (Command::Wait, _) => {
            sig.put(0).unwrap();
            Reply::None
        }
        // Restoring fails and the condition goes bad again meanwhile
        (_, Some("post")) if !relapsed => {
            relapsed = true;
            sig.put(1).unwrap();
            Reply::Failed(SuspendError::Plan("restore failed".into()))
        }
        _ => Reply::None,
    });
    assert!(result.is_ok());
    assert_eq!(
        commands(&seen),
        vec![
            Command::Wait,
            Command::Null,
            Command::Wait,
            Command::Null,
            Command::Read
        ]
    );
    assert!(!watcher.is_suspended());
}

#[test]
fn test_concurrent_notifications_keep_one_outstanding_cell() {
    let hold_down = Duration::from_millis(500);
    let sig = flag();
    let watcher = ConditionWatcher::builder(Arc::new(sig.clone()), Arc::new(NonZero))
        .with_hold_down(hold_down)
        .build();
    let mut plan = watcher.wrap(MsgPlan::new(vec![read("det")])).unwrap();
    sig.put(1).unwrap();
    let cell = watcher.current_cell();

    let consumer = thread::spawn(move || {
        let (seen, result) = run_recorded(&mut plan, |_, _| Reply::None);
        (commands(&seen), result.is_ok(), Instant::now())
    });

    thread::scope(|scope| {
        for _ in 0..4 {
            let sig = sig.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    sig.put(0).unwrap();
                    sig.put(1).unwrap();
                }
            });
        }
    });
    // Threads can deliver out of order; settle on a bad value
    sig.put(1).unwrap();

    assert!(watcher.is_suspended());
    assert!(watcher.current_cell().same_cell(&cell));
    thread::sleep(hold_down + Duration::from_millis(200));
    assert!(!cell.is_resolved());
    assert!(!consumer.is_finished());

    sig.put(0).unwrap();
    let resumed = Instant::now();
    let (cmds, ok, finished) = consumer.join().unwrap();
    assert!(ok);
    assert_eq!(cmds, vec![Command::Wait, Command::Read]);
    assert!(cell.is_resolved());
    assert_hold_down(
        finished.duration_since(resumed),
        hold_down,
        env_timing_tolerance(),
        "hold-down after concurrent flips",
    );
}

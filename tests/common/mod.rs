//! Common test utilities for daq-suspend integration tests
//!
//! This module provides reusable test helpers for:
//! - Timing assertions with appropriate tolerances
//! - Environment-aware tolerance selection
//! - Driving plans with a recording executor

#![allow(dead_code)] // Utilities may not all be used by every test binary

use daq_suspend::{run_plan, Command, Msg, Plan, Reply, SuspendResult};
use std::time::Duration;

/// Tolerance levels for real-time timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// 20% tolerance - default for local development
    Normal,
    /// 50% tolerance - for CI environments with variable load
    Relaxed,
}

impl TimingTolerance {
    /// Get the tolerance factor as a fraction (0.0 to 1.0)
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Normal => 0.20,
            TimingTolerance::Relaxed => 0.50,
        }
    }
}

/// Assert that a hold-down lasted at least `expected` and did not overrun
/// it by more than the tolerance.
///
/// Hold-downs never finish early, so the lower bound is strict apart from a
/// few milliseconds of clock granularity.
pub fn assert_hold_down(actual: Duration, expected: Duration, tolerance: TimingTolerance, context: &str) {
    let min = expected.saturating_sub(Duration::from_millis(5));
    let max = expected.mul_f64(1.0 + tolerance.factor()) + Duration::from_millis(50);

    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} +{:.0}%, got {:?} (acceptable range: {:?} to {:?})",
        context,
        expected,
        tolerance.factor() * 100.0,
        actual,
        min,
        max
    );
}

/// Get appropriate timing tolerance based on environment.
pub fn env_timing_tolerance() -> TimingTolerance {
    if std::env::var("CI").is_ok() {
        TimingTolerance::Relaxed
    } else {
        TimingTolerance::Normal
    }
}

/// Drive `plan` to completion, recording every instruction the executor
/// sees. `hook` gets the instruction's position and the instruction and
/// produces the reply.
pub fn run_recorded<P, F>(plan: &mut P, mut hook: F) -> (Vec<Msg>, SuspendResult<Reply>)
where
    P: Plan + ?Sized,
    F: FnMut(usize, &Msg) -> Reply,
{
    let mut seen = Vec::new();
    let result = run_plan(plan, |msg| {
        let reply = hook(seen.len(), msg);
        seen.push(msg.clone());
        reply
    });
    (seen, result)
}

/// Commands of `msgs`, in order.
pub fn commands(msgs: &[Msg]) -> Vec<Command> {
    msgs.iter().map(|msg| msg.command.clone()).collect()
}

/// The `tag` keyword of `msg`, if any.
pub fn tag(msg: &Msg) -> Option<&str> {
    msg.kwargs.get("tag").and_then(|tag| tag.as_str())
}

/// A `null` instruction tagged with `tag`.
pub fn tagged(tag: &str) -> Msg {
    daq_suspend::plan::stubs::null().with_kwarg("tag", tag)
}

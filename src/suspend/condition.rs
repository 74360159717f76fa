//! Suspend/resume predicates.
//!
//! A [`SuspendCondition`] decides, for each value reported by a condition
//! source, whether the watcher should suspend (while running) or resume
//! (while suspended). Resuming defaults to "no longer suspending", but a
//! condition may override it to get a hysteresis band.

use crate::error::{SuspendError, SuspendResult};

/// Decides when a watcher suspends and resumes.
pub trait SuspendCondition<V>: Send + Sync {
    /// Returns `true` if `value` should suspend the plan.
    ///
    /// There is no sensible default; conditions that do not override this
    /// fail with [`SuspendError::Unimplemented`].
    fn should_suspend(&self, value: &V) -> SuspendResult<bool> {
        let _ = value;
        Err(SuspendError::Unimplemented("should_suspend"))
    }

    /// Returns `true` if `value` should end a suspension.
    fn should_resume(&self, value: &V) -> SuspendResult<bool> {
        Ok(!self.should_suspend(value)?)
    }
}

/// Condition with no behaviour of its own. Every decision fails as
/// unimplemented; useful as a placeholder and to exercise that path.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseCondition;

impl<V> SuspendCondition<V> for BaseCondition {}

/// Values that can be read as a numeric level.
pub trait ConditionValue {
    /// The value as a level, or `None` when it has no numeric meaning.
    fn level(&self) -> Option<f64>;
}

impl ConditionValue for f64 {
    fn level(&self) -> Option<f64> {
        (!self.is_nan()).then_some(*self)
    }
}

impl ConditionValue for f32 {
    fn level(&self) -> Option<f64> {
        f64::from(*self).level()
    }
}

impl ConditionValue for bool {
    fn level(&self) -> Option<f64> {
        Some(if *self { 1.0 } else { 0.0 })
    }
}

macro_rules! integer_level {
    ($($ty:ty),*) => {
        $(impl ConditionValue for $ty {
            fn level(&self) -> Option<f64> {
                Some(*self as f64)
            }
        })*
    };
}

integer_level!(i32, i64, u32, u64);

impl ConditionValue for serde_json::Value {
    fn level(&self) -> Option<f64> {
        match self {
            serde_json::Value::Bool(flag) => flag.level(),
            serde_json::Value::Number(number) => number.as_f64(),
            _ => None,
        }
    }
}

fn level_of<V: ConditionValue + std::fmt::Debug>(value: &V) -> SuspendResult<f64> {
    value
        .level()
        .ok_or_else(|| SuspendError::malformed("condition", format!("{value:?} has no numeric level")))
}

/// Suspend while the value is nonzero (a raised fault flag).
#[derive(Debug, Clone, Copy, Default)]
pub struct NonZero;

impl<V: ConditionValue + std::fmt::Debug> SuspendCondition<V> for NonZero {
    fn should_suspend(&self, value: &V) -> SuspendResult<bool> {
        Ok(level_of(value)? != 0.0)
    }
}

/// Suspend while the value is below a minimum (beam-drop style).
#[derive(Debug, Clone, Copy)]
pub struct BelowThreshold {
    /// Lowest acceptable level.
    pub min: f64,
}

impl BelowThreshold {
    /// Default minimum beam level, in mJ.
    pub const DEFAULT_MIN_BEAM: f64 = 0.1;

    /// Suspend below `min`.
    pub fn new(min: f64) -> Self {
        Self { min }
    }
}

impl Default for BelowThreshold {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_BEAM)
    }
}

impl<V: ConditionValue + std::fmt::Debug> SuspendCondition<V> for BelowThreshold {
    fn should_suspend(&self, value: &V) -> SuspendResult<bool> {
        Ok(level_of(value)? < self.min)
    }
}

/// Suspend below one level, resume only above a higher one.
#[derive(Debug, Clone, Copy)]
pub struct Hysteresis {
    /// Suspend when the level drops below this.
    pub suspend_below: f64,
    /// Resume once the level is at or above this.
    pub resume_above: f64,
}

impl Hysteresis {
    /// Band from `suspend_below` to `resume_above`.
    pub fn new(suspend_below: f64, resume_above: f64) -> Self {
        Self {
            suspend_below,
            resume_above,
        }
    }
}

impl<V: ConditionValue + std::fmt::Debug> SuspendCondition<V> for Hysteresis {
    fn should_suspend(&self, value: &V) -> SuspendResult<bool> {
        Ok(level_of(value)? < self.suspend_below)
    }

    fn should_resume(&self, value: &V) -> SuspendResult<bool> {
        Ok(level_of(value)? >= self.resume_above)
    }
}

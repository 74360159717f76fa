//! Condition-gated suspension of plans.
//!
//! - [`condition`]: when to suspend and resume
//! - [`holddown`]: the cancellable wait after recovery
//! - [`watcher`]: the state machine and the stream interceptor
//! - [`replay`]: drop-and-retry of the open bundle

pub mod condition;
pub mod holddown;
pub mod replay;
pub mod watcher;

pub use condition::{BaseCondition, BelowThreshold, ConditionValue, Hysteresis, NonZero, SuspendCondition};
pub use holddown::HoldDownTimer;
pub use replay::{DropAndRetry, ReplayBuffer, ReplayProcessor};
pub use watcher::{
    ConditionWatcher, PlanFactory, WatchProcessor, Watched, WatcherBuilder, DEFAULT_BEAM_HOLD_DOWN,
    READING_COMMANDS,
};

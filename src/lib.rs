//! Condition-gated suspend, drop and replay for DAQ plan streams.
//!
//! A plan is a lazily-produced stream of instructions consumed one step at a
//! time by an executor. This crate wraps plans so that they react to an
//! external condition (beam present, fault flag clear) without the plan
//! author writing that logic inline:
//!
//! - [`suspend::ConditionWatcher`] holds back watched instructions while the
//!   condition is bad and lets them through after a hold-down period.
//! - [`suspend::DropAndRetry`] additionally drops the open bundle and replays
//!   its readings once the condition recovers.
//! - [`filter::BundleFilter`] drops bundles that took too long or read bad
//!   values.
//! - [`counter::ThresholdCounter`] resolves a rendezvous once enough events
//!   have been seen.
//!
//! ```rust,ignore
//! let beam = Signal::new("beam_mj", 1.0);
//! let suspender = DropAndRetry::beam_drop(Arc::new(beam.clone()), 0.1, Duration::from_secs(5));
//! let mut plan = suspender.wrap(MsgPlan::new(trigger_and_read(&["det"], "primary")))?;
//! run_plan(&mut plan, |msg| executor.execute(msg))?;
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod filter;
pub mod plan;
pub mod rendezvous;
pub mod resource;
pub mod signal;
pub mod suspend;

pub use error::{SuspendError, SuspendResult};
pub use plan::{run_plan, BoxPlan, Command, Msg, MsgPlan, Plan, Reply, Step};
pub use rendezvous::RendezvousCell;
pub use signal::{ConditionSource, Signal};

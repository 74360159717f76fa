//! Plan protocol: instructions, replies, and the generator-style `Plan` trait.
//!
//! A plan is a lazily-produced, forward-only sequence of [`Msg`]
//! instructions. The executor pulls one instruction at a time with
//! [`Plan::advance`], passing back its [`Reply`] to the previous instruction:
//!
//! ```text
//! executor                         plan
//!    │── advance(Reply::None) ───────▶│
//!    │◀────────────── Emit(create) ───│
//!    │── advance(Reply::None) ───────▶│
//!    │◀──────────────── Emit(read) ───│
//!    │── advance(Value({..})) ───────▶│
//!    │◀──────────────── Done(reply) ──│
//! ```
//!
//! A [`Reply::Failed`] raises the executor's error inside the plan. Plans
//! that do not handle it return it as `Err`, which unwinds to the consumer.

pub mod mutator;
pub mod stubs;

pub use mutator::{MsgProcessor, PlanMutator};

use crate::error::{SuspendError, SuspendResult};
use crate::rendezvous::RendezvousCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Instruction verbs understood by the suspend core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    /// Ask a device to take a reading.
    Trigger,
    /// Open an event bundle.
    Create,
    /// Read a device into the open bundle.
    Read,
    /// Commit the open bundle.
    Save,
    /// Discard the open bundle.
    Drop,
    /// Block until a rendezvous cell resolves.
    Wait,
    /// Do nothing.
    Null,
    /// Sleep for a number of seconds.
    Sleep,
    /// Move or set a device.
    Set,
    /// Any other verb, passed through untouched.
    Other(String),
}

impl Command {
    /// Lowercase wire name of the command.
    pub fn as_str(&self) -> &str {
        match self {
            Command::Trigger => "trigger",
            Command::Create => "create",
            Command::Read => "read",
            Command::Save => "save",
            Command::Drop => "drop",
            Command::Wait => "wait",
            Command::Null => "null",
            Command::Sleep => "sleep",
            Command::Set => "set",
            Command::Other(name) => name,
        }
    }
}

impl From<String> for Command {
    fn from(name: String) -> Self {
        match name.as_str() {
            "trigger" => Command::Trigger,
            "create" => Command::Create,
            "read" => Command::Read,
            "save" => Command::Save,
            "drop" => Command::Drop,
            "wait" => Command::Wait,
            "null" => Command::Null,
            "sleep" => Command::Sleep,
            "set" => Command::Set,
            _ => Command::Other(name),
        }
    }
}

impl From<&str> for Command {
    fn from(name: &str) -> Self {
        Command::from(name.to_string())
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic step of a plan.
///
/// `uid` is the instruction's identity. Cloning keeps it, which is how the
/// interceptor re-issues an instruction it held back; constructors always mint
/// a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    uid: Uuid,
    /// The verb.
    pub command: Command,
    /// Resource reference the command acts on, if any.
    pub target: Option<String>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    rendezvous: Option<RendezvousCell<()>>,
}

impl Msg {
    /// New instruction with a fresh identity.
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            command: command.into(),
            target: None,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            rendezvous: None,
        }
    }

    /// Set the target resource.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, arg: impl Into<serde_json::Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Attach the cell a `wait` instruction blocks on.
    pub fn with_rendezvous(mut self, cell: RendezvousCell<()>) -> Self {
        self.rendezvous = Some(cell);
        self
    }

    /// The instruction's identity.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// The cell carried by a `wait` instruction.
    pub fn rendezvous(&self) -> Option<&RendezvousCell<()>> {
        self.rendezvous.as_ref()
    }

    /// Whether `other` is this very instruction (not merely an equal one).
    pub fn is_same(&self, other: &Msg) -> bool {
        self.uid == other.uid
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "Msg({}, {})", self.command, target),
            None => write!(f, "Msg({})", self.command),
        }
    }
}

/// The executor's answer to the last emitted instruction.
#[derive(Debug, Default)]
pub enum Reply {
    /// No value.
    #[default]
    None,
    /// A value, e.g. the reading returned by `read`.
    Value(serde_json::Value),
    /// The instruction failed; the error is raised inside the plan.
    Failed(SuspendError),
}

impl Reply {
    /// Whether this reply carries a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Reply::Failed(_))
    }

    /// Turn a failure into `Err`, passing any other reply through.
    pub fn into_result(self) -> SuspendResult<Reply> {
        match self {
            Reply::Failed(err) => Err(err),
            other => Ok(other),
        }
    }
}

/// What a plan produced on one call to [`Plan::advance`].
#[derive(Debug)]
pub enum Step {
    /// Hand this instruction to the executor.
    Emit(Msg),
    /// The plan is exhausted; carries its return value.
    Done(Reply),
}

/// A lazily-produced instruction stream.
pub trait Plan: Send {
    /// Deliver `reply` for the previously emitted instruction and produce the
    /// next step. The first call receives `Reply::None`.
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step>;
}

/// Type-erased plan.
pub type BoxPlan = Box<dyn Plan>;

impl<P: Plan + ?Sized> Plan for Box<P> {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        (**self).advance(reply)
    }
}

/// Plan over a fixed list of instructions.
///
/// Replies are ignored except failures, which end the plan with `Err`.
#[derive(Debug, Default)]
pub struct MsgPlan {
    msgs: VecDeque<Msg>,
}

impl MsgPlan {
    /// Plan emitting `msgs` in order.
    pub fn new(msgs: impl IntoIterator<Item = Msg>) -> Self {
        Self {
            msgs: msgs.into_iter().collect(),
        }
    }

    /// Plan that emits nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Instructions not yet emitted.
    pub fn remaining(&self) -> usize {
        self.msgs.len()
    }
}

impl Plan for MsgPlan {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        reply.into_result()?;
        Ok(match self.msgs.pop_front() {
            Some(msg) => Step::Emit(msg),
            None => Step::Done(Reply::None),
        })
    }
}

/// Drive `plan` to completion, answering each instruction with `executor`.
///
/// Returns the plan's return value.
pub fn run_plan<P, F>(plan: &mut P, mut executor: F) -> SuspendResult<Reply>
where
    P: Plan + ?Sized,
    F: FnMut(&Msg) -> Reply,
{
    let mut reply = Reply::None;
    loop {
        match plan.advance(reply)? {
            Step::Emit(msg) => reply = executor(&msg),
            Step::Done(ret) => return Ok(ret),
        }
    }
}

/// Collect every instruction of `plan`, replying `Reply::None` to each.
pub fn collect_msgs<P: Plan + ?Sized>(plan: &mut P) -> SuspendResult<Vec<Msg>> {
    let mut msgs = Vec::new();
    run_plan(plan, |msg| {
        msgs.push(msg.clone());
        Reply::None
    })?;
    Ok(msgs)
}

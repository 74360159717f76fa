//! Stream mutation: substitute sub-plans for selected instructions.
//!
//! [`PlanMutator`] walks a plan and offers every instruction to a
//! [`MsgProcessor`]. The processor either lets it through or returns a
//! replacement sub-plan. The sub-plan runs in place of the instruction and
//! its return value becomes the reply the original plan sees for that
//! instruction.
//!
//! Instructions produced by a sub-plan are offered to the processor too, so
//! substitutions nest. The one exception is the instruction that caused the
//! substitution: when the sub-plan re-emits it (same identity), it goes
//! straight downstream. That exemption lasts only as long as the sub-plan:
//! once it finishes or fails, the same instruction is processed again if a
//! plan yields it.
//!
//! Errors unwind one frame at a time: a failing sub-plan is removed and its
//! error is raised in the plan below it as [`Reply::Failed`].

use super::{BoxPlan, Msg, Plan, Reply, Step};
use crate::error::SuspendResult;
use std::collections::HashSet;
use tracing::trace;
use uuid::Uuid;

/// Per-instruction decision hook for [`PlanMutator`].
pub trait MsgProcessor: Send {
    /// Return `Some(plan)` to run `plan` instead of `msg`.
    fn process(&mut self, msg: &Msg) -> Option<BoxPlan>;

    /// Called for every instruction actually sent downstream, in order.
    fn emitted(&mut self, _msg: &Msg) {}
}

impl<F> MsgProcessor for F
where
    F: FnMut(&Msg) -> Option<BoxPlan> + Send,
{
    fn process(&mut self, msg: &Msg) -> Option<BoxPlan> {
        self(msg)
    }
}

struct Frame {
    plan: BoxPlan,
    /// Uid of the instruction this sub-plan replaced; `None` for the root.
    replaces: Option<Uuid>,
}

/// A plan with per-instruction substitution applied.
pub struct PlanMutator<M> {
    stack: Vec<Frame>,
    substituted: HashSet<Uuid>,
    processor: M,
}

impl<M: MsgProcessor> PlanMutator<M> {
    /// Mutate `plan` with `processor`.
    pub fn new(plan: impl Plan + 'static, processor: M) -> Self {
        Self {
            stack: vec![Frame {
                plan: Box::new(plan),
                replaces: None,
            }],
            substituted: HashSet::new(),
            processor,
        }
    }

    /// Number of plans currently stacked (the root plan included).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The processor driving the substitutions.
    pub fn processor(&self) -> &M {
        &self.processor
    }

    fn pop(&mut self) {
        if let Some(Frame {
            replaces: Some(uid), ..
        }) = self.stack.pop()
        {
            self.substituted.remove(&uid);
        }
    }

    fn pass_down(&mut self, msg: Msg) -> SuspendResult<Step> {
        self.processor.emitted(&msg);
        Ok(Step::Emit(msg))
    }
}

impl<M: MsgProcessor> Plan for PlanMutator<M> {
    fn advance(&mut self, reply: Reply) -> SuspendResult<Step> {
        let mut reply = reply;
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(Step::Done(reply));
            };

            match top.plan.advance(reply) {
                Ok(Step::Emit(msg)) => {
                    if self.substituted.remove(&msg.uid()) {
                        return self.pass_down(msg);
                    }
                    match self.processor.process(&msg) {
                        Some(sub_plan) => {
                            trace!(%msg, "substituting sub-plan");
                            self.substituted.insert(msg.uid());
                            self.stack.push(Frame {
                                plan: sub_plan,
                                replaces: Some(msg.uid()),
                            });
                            reply = Reply::None;
                        }
                        None => return self.pass_down(msg),
                    }
                }
                Ok(Step::Done(ret)) => {
                    self.pop();
                    if self.stack.is_empty() {
                        return Ok(Step::Done(ret));
                    }
                    reply = ret;
                }
                Err(err) => {
                    self.pop();
                    if self.stack.is_empty() {
                        return Err(err);
                    }
                    reply = Reply::Failed(err);
                }
            }
        }
    }
}

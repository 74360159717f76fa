//! Instruction builders used to assemble plans.

use super::{Command, Msg};
use crate::rendezvous::RendezvousCell;

/// Ask `target` to take a reading.
pub fn trigger(target: &str) -> Msg {
    Msg::new(Command::Trigger).with_target(target)
}

/// Open an event bundle in `stream`.
pub fn create(stream: &str) -> Msg {
    Msg::new(Command::Create).with_kwarg("name", stream)
}

/// Read `target` into the open bundle.
pub fn read(target: &str) -> Msg {
    Msg::new(Command::Read).with_target(target)
}

/// Commit the open bundle.
pub fn save() -> Msg {
    Msg::new(Command::Save)
}

/// Discard the open bundle.
pub fn drop_bundle() -> Msg {
    Msg::new(Command::Drop)
}

/// Instruction that does nothing.
pub fn null() -> Msg {
    Msg::new(Command::Null)
}

/// Sleep for `seconds`.
pub fn sleep(seconds: f64) -> Msg {
    Msg::new(Command::Sleep).with_arg(seconds)
}

/// Move or set `target` to `value`.
pub fn set(target: &str, value: impl Into<serde_json::Value>) -> Msg {
    Msg::new(Command::Set).with_target(target).with_arg(value)
}

/// Block until `cell` resolves.
pub fn wait_for(cell: RendezvousCell<()>) -> Msg {
    Msg::new(Command::Wait).with_rendezvous(cell)
}

/// The usual trigger-and-read bundle for a set of detectors.
pub fn trigger_and_read(detectors: &[&str], stream: &str) -> Vec<Msg> {
    let mut msgs = Vec::with_capacity(detectors.len() * 2 + 2);
    msgs.push(create(stream));
    msgs.extend(detectors.iter().map(|det| trigger(det)));
    msgs.extend(detectors.iter().map(|det| read(det)));
    msgs.push(save());
    msgs
}

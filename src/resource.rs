//! Movable lookup for composite devices.
//!
//! Devices expose their motion axis under one of a few well-known component
//! roles. [`resolve_movable`] tries them in a fixed order and returns a typed
//! reference to the first one present, or fails with
//! [`SuspendError::NoMovable`].

use crate::error::{SuspendError, SuspendResult};
use crate::plan::stubs::set;
use crate::plan::Msg;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Component roles that can carry a device's movable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovableRole {
    /// Plain motor.
    Motor,
    /// Vertical motor of a two-axis stage.
    YMotor,
    /// Motor behind a states (preset position) device.
    StatesMotor,
}

impl MovableRole {
    /// Lookup order.
    pub const ORDER: [MovableRole; 3] = [MovableRole::Motor, MovableRole::YMotor, MovableRole::StatesMotor];

    /// Component name for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            MovableRole::Motor => "motor",
            MovableRole::YMotor => "y_motor",
            MovableRole::StatesMotor => "states_motor",
        }
    }
}

impl fmt::Display for MovableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device and its named components (component name -> resource reference).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device name.
    pub name: String,
    /// Components by name.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
}

impl Device {
    /// Device with no components.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: BTreeMap::new(),
        }
    }

    /// Add a component.
    pub fn with_component(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.components.insert(name.into(), target.into());
        self
    }

    /// Resource reference of component `name`.
    pub fn component(&self, name: &str) -> Option<&str> {
        self.components.get(name).map(String::as_str)
    }
}

/// A device's resolved movable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovableRef {
    /// Owning device.
    pub device: String,
    /// Role it was found under.
    pub role: MovableRole,
    /// Resource reference instructions should target.
    pub target: String,
}

impl MovableRef {
    /// Instruction moving the movable to `position`.
    pub fn move_to(&self, position: f64) -> Msg {
        set(&self.target, position)
    }
}

/// Find the movable of `device`.
pub fn resolve_movable(device: &Device) -> SuspendResult<MovableRef> {
    MovableRole::ORDER
        .iter()
        .find_map(|role| {
            device.component(role.as_str()).map(|target| MovableRef {
                device: device.name.clone(),
                role: *role,
                target: target.to_string(),
            })
        })
        .ok_or_else(|| SuspendError::NoMovable(device.name.clone()))
}

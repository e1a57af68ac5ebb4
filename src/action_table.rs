//! Action Table: the time-ordered ledger of hardware instructions.
//!
//! An [`ActionTable`] holds every `(time, target, value)` entry computed for
//! one experiment repetition. It is append-only: entries cannot be removed or
//! edited once recorded, and the table never reorders entries to resolve a
//! conflict. Two invariants are enforced on insertion:
//!
//! - no entry is scheduled before the experiment origin;
//! - entries for the same target are strictly increasing in time.
//!
//! Entries for different targets may share a timestamp. Iteration yields
//! entries sorted by time, with ties in insertion order, which is the order
//! the execution layer dispatches them in.
//!
//! # Example
//!
//! ```
//! use cockpit::action_table::{ActionTable, ActionValue, DeviceRef};
//! use cockpit::time::ExactTime;
//!
//! let stage = DeviceRef::new("z piezo");
//! let mut table = ActionTable::new();
//! table.add_action(ExactTime::from_millis(1), stage.clone(), ActionValue::Position(2.0))?;
//! assert!(table
//!     .add_action(ExactTime::from_millis(1), stage.clone(), ActionValue::Position(3.0))
//!     .is_err());
//! # Ok::<(), cockpit::error::OrderingError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::OrderingError;
use crate::time::ExactTime;

/// Name of a device that receives actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRef(Arc<str>);

impl DeviceRef {
    /// Reference the device called `name`.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The device name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DeviceRef {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// What a device is told to do. Each device only ever receives one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ActionValue {
    /// Move a stage or piezo to an absolute position (µm).
    Position(f64),
    /// Drive a remote-focus actuator with one value per channel.
    Actuator(Vec<f64>),
    /// Trigger a camera; the exposure window opens at the action time.
    Trigger {
        /// Exposure length (ms).
        exposure: ExactTime,
    },
    /// Switch a light source on for `duration`.
    Pulse {
        /// On time (ms).
        duration: ExactTime,
    },
}

impl ActionValue {
    /// Short label for the kind of action.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionValue::Position(_) => "position",
            ActionValue::Actuator(_) => "actuator",
            ActionValue::Trigger { .. } => "trigger",
            ActionValue::Pulse { .. } => "pulse",
        }
    }
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Position(z) => write!(f, "position {z}"),
            ActionValue::Actuator(values) => {
                write!(f, "actuator [")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            ActionValue::Trigger { exposure } => write!(f, "trigger ({exposure} ms exposure)"),
            ActionValue::Pulse { duration } => write!(f, "pulse ({duration} ms)"),
        }
    }
}

/// One scheduled instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Milliseconds from the start of the repetition.
    pub time: ExactTime,
    /// Device that carries it out.
    pub target: DeviceRef,
    /// What the device does.
    pub value: ActionValue,
}

/// Append-only, time-ordered set of actions for one repetition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionTable {
    /// Sorted by time; equal times keep insertion order.
    actions: Vec<Action>,
    #[serde(skip)]
    last_time: HashMap<DeviceRef, ExactTime>,
}

impl ActionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `target` at `time`.
    ///
    /// # Errors
    ///
    /// [`OrderingError::BeforeStart`] for a negative time, and
    /// [`OrderingError::NotAfterPrevious`] when `target` already has an
    /// action at or after `time`.
    pub fn add_action(
        &mut self,
        time: ExactTime,
        target: DeviceRef,
        value: ActionValue,
    ) -> Result<(), OrderingError> {
        if time.is_negative() {
            return Err(OrderingError::BeforeStart {
                target,
                attempted: time,
            });
        }
        if let Some(previous) = self.last_time.get(&target) {
            if time <= *previous {
                return Err(OrderingError::NotAfterPrevious {
                    target,
                    attempted: time,
                    previous: previous.clone(),
                });
            }
        }

        // Upper bound: after every entry with an equal time.
        let index = self.actions.partition_point(|a| a.time <= time);
        self.last_time.insert(target.clone(), time.clone());
        self.actions.insert(
            index,
            Action {
                time,
                target,
                value,
            },
        );
        Ok(())
    }

    /// Timestamp of the latest action for `target`; `None` if it was never
    /// used.
    pub fn ready_time(&self, target: &DeviceRef) -> Option<&ExactTime> {
        self.last_time.get(target)
    }

    /// The latest action recorded for `target`.
    pub fn last_action_for(&self, target: &DeviceRef) -> Option<&Action> {
        self.last_time.get(target)?;
        // Per-target times are strictly increasing, so the last match in time
        // order is the latest one.
        self.actions.iter().rev().find(|a| &a.target == target)
    }

    /// All actions in dispatch order. The iterator is lazy and can be cloned
    /// to restart from any point.
    pub fn entries(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    /// Times of the first and last actions, if any.
    pub fn first_and_last_times(&self) -> Option<(&ExactTime, &ExactTime)> {
        match (self.actions.first(), self.actions.last()) {
            (Some(first), Some(last)) => Some((&first.time, &last.time)),
            _ => None,
        }
    }

    /// Span from the experiment origin to the last action.
    pub fn duration(&self) -> ExactTime {
        self.actions
            .last()
            .map(|a| a.time.clone())
            .unwrap_or_default()
    }

    /// Every device that received at least one action, sorted by name.
    pub fn targets(&self) -> Vec<&DeviceRef> {
        let mut targets: Vec<_> = self.last_time.keys().collect();
        targets.sort();
        targets
    }

    /// Number of consecutive actions from `start` (in dispatch order) that
    /// `accepts` returns true for. An executor uses this to find how much of
    /// the table it can run before handing over to another executor.
    pub fn runnable_prefix<F>(&self, start: usize, accepts: F) -> usize
    where
        F: Fn(&Action) -> bool,
    {
        self.actions
            .iter()
            .skip(start)
            .take_while(|a| accepts(a))
            .count()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True before the first action.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<'a> IntoIterator for &'a ActionTable {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}

impl fmt::Display for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in &self.actions {
            writeln!(
                f,
                "{:>20}  {:<24} {}",
                action.time.to_string(),
                action.target.name(),
                action.value
            )?;
        }
        Ok(())
    }
}

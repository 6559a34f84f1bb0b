//! Actuator model: logical state to physical output level.
//!
//! A circuit commands an [`ActuatorState`]; the [`Actuator`] turns that into
//! an [`OutputLevel`] for its [`OutputDriver`].  Wiring polarity is applied
//! here, at the output stage, and nowhere else.

use serde::{Deserialize, Serialize};

use crate::app::ports::{OutputDriver, OutputLevel};
use crate::error::ActuatorError;

/// Logical actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorState {
    Active,
    Inactive,
}

impl ActuatorState {
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Bus payload token.
    pub fn as_payload(self) -> &'static str {
        match self {
            Self::Active => "1",
            Self::Inactive => "0",
        }
    }

    /// Parse a bus payload token.  Anything but `"1"` / `"0"` is rejected.
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload.trim() {
            "1" => Some(Self::Active),
            "0" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// What kind of output the actuator drives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuatorKind {
    /// On/off relay.
    Digital,
    /// Proportional output: `Active` drives `high`, `Inactive` drives `low`.
    Continuous { low: f32, high: f32 },
}

pub struct Actuator {
    kind: ActuatorKind,
    polarity_inverted: bool,
    driver: Box<dyn OutputDriver>,
    state: ActuatorState,
}

impl Actuator {
    /// The actuator starts `Inactive`; nothing is written until the first
    /// [`apply`](Self::apply).
    pub fn new(kind: ActuatorKind, polarity_inverted: bool, driver: Box<dyn OutputDriver>) -> Self {
        Self {
            kind,
            polarity_inverted,
            driver,
            state: ActuatorState::Inactive,
        }
    }

    /// Drive the output to `state`.
    pub fn apply(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let level = self.level_for(state);
        self.driver.write(level)?;
        self.state = state;
        Ok(())
    }

    /// Physical level that represents `state` on this output.
    pub fn level_for(&self, state: ActuatorState) -> OutputLevel {
        let on = state.is_active() != self.polarity_inverted;
        match self.kind {
            ActuatorKind::Digital => OutputLevel::Digital(on),
            ActuatorKind::Continuous { low, high } => OutputLevel::Duty(if on { high } else { low }),
        }
    }

    /// Last successfully applied state.
    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn polarity_inverted(&self) -> bool {
        self.polarity_inverted
    }
}

impl core::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Actuator")
            .field("kind", &self.kind)
            .field("polarity_inverted", &self.polarity_inverted)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

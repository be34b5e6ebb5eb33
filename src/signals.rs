//! Signal registry.
//!
//! Holds the current value of every modeled vehicle signal. Setting a signal
//! validates it against its declared range, stores the constrained value and
//! re-encodes the owning frame bytes before returning.

use crate::encoder;
use crate::frames::{FrameError, FrameTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SIGNAL_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalId {
    Ignition,
    OutdoorTemp,
    CoolantTemp,
    Rpm,
    VehicleSpeed,
    Brightness,
    DashboardLighting,
    DoorFrontLeft,
    DoorFrontRight,
    DoorRearLeft,
    DoorRearRight,
    Trunk,
}

impl SignalId {
    pub const ALL: [SignalId; SIGNAL_COUNT] = [
        SignalId::Ignition,
        SignalId::OutdoorTemp,
        SignalId::CoolantTemp,
        SignalId::Rpm,
        SignalId::VehicleSpeed,
        SignalId::Brightness,
        SignalId::DashboardLighting,
        SignalId::DoorFrontLeft,
        SignalId::DoorFrontRight,
        SignalId::DoorRearLeft,
        SignalId::DoorRearRight,
        SignalId::Trunk,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn spec(self) -> &'static SignalSpec {
        &SIGNAL_SPECS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }
}

impl core::fmt::Display for SignalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for SignalId {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalId::ALL
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SignalError::UnknownSignal(s.to_string()))
    }
}

/// A signal value as received from the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Int(i32),
    Fixed(f32),
}

impl SignalValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            SignalValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Numeric view used by the encoder; booleans map to 0 and 1.
    pub fn as_f32(self) -> f32 {
        match self {
            SignalValue::Bool(b) => f32::from(u8::from(b)),
            SignalValue::Int(v) => v as f32,
            SignalValue::Fixed(v) => v,
        }
    }
}

impl core::fmt::Display for SignalValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SignalValue::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            SignalValue::Int(v) => write!(f, "{}", v),
            SignalValue::Fixed(v) => write!(f, "{:.2}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    Bool,
    Integer { min: i32, max: i32, step: i32 },
    Fixed { min: f32, max: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct SignalSpec {
    pub id: SignalId,
    pub name: &'static str,
    pub kind: SignalKind,
    pub initial: SignalValue,
}

pub static SIGNAL_SPECS: [SignalSpec; SIGNAL_COUNT] = [
    SignalSpec {
        id: SignalId::Ignition,
        name: "ignition",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
    SignalSpec {
        id: SignalId::OutdoorTemp,
        name: "outdoorTemp",
        kind: SignalKind::Integer { min: -40, max: 85, step: 1 },
        initial: SignalValue::Int(0),
    },
    SignalSpec {
        id: SignalId::CoolantTemp,
        name: "coolantTemp",
        kind: SignalKind::Integer { min: -39, max: 120, step: 1 },
        initial: SignalValue::Int(0),
    },
    SignalSpec {
        id: SignalId::Rpm,
        name: "rpm",
        kind: SignalKind::Integer { min: 0, max: 8000, step: 100 },
        initial: SignalValue::Int(0),
    },
    SignalSpec {
        id: SignalId::VehicleSpeed,
        name: "vehicleSpeed",
        kind: SignalKind::Integer { min: 0, max: 250, step: 1 },
        initial: SignalValue::Int(0),
    },
    SignalSpec {
        id: SignalId::Brightness,
        name: "brightness",
        kind: SignalKind::Integer { min: 0, max: 15, step: 1 },
        initial: SignalValue::Int(15),
    },
    SignalSpec {
        id: SignalId::DashboardLighting,
        name: "dashboardLighting",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(true),
    },
    SignalSpec {
        id: SignalId::DoorFrontLeft,
        name: "doorFrontLeft",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
    SignalSpec {
        id: SignalId::DoorFrontRight,
        name: "doorFrontRight",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
    SignalSpec {
        id: SignalId::DoorRearLeft,
        name: "doorRearLeft",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
    SignalSpec {
        id: SignalId::DoorRearRight,
        name: "doorRearRight",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
    SignalSpec {
        id: SignalId::Trunk,
        name: "trunk",
        kind: SignalKind::Bool,
        initial: SignalValue::Bool(false),
    },
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("signal {signal} expects a {expected} value")]
    TypeMismatch {
        signal: SignalId,
        expected: &'static str,
    },
    #[error("signal {0} cannot take a non-finite value")]
    NotFinite(SignalId),
    #[error(transparent)]
    Encoding(#[from] FrameError),
}

impl SignalSpec {
    /// Clamp `value` into the declared range and snap it to the step grid.
    /// Out-of-range input is never an error; the wrong value type is.
    pub fn constrain(&self, value: SignalValue) -> Result<SignalValue, SignalError> {
        match (self.kind, value) {
            (SignalKind::Bool, SignalValue::Bool(b)) => Ok(SignalValue::Bool(b)),
            (SignalKind::Bool, _) => Err(SignalError::TypeMismatch {
                signal: self.id,
                expected: "boolean",
            }),
            (SignalKind::Integer { .. } | SignalKind::Fixed { .. }, SignalValue::Bool(_)) => {
                Err(SignalError::TypeMismatch {
                    signal: self.id,
                    expected: "numeric",
                })
            }
            (SignalKind::Integer { min, max, step }, SignalValue::Int(v)) => {
                Ok(SignalValue::Int(snap_to_step(v, min, max, step)))
            }
            (SignalKind::Integer { min, max, step }, SignalValue::Fixed(v)) => {
                if !v.is_finite() {
                    return Err(SignalError::NotFinite(self.id));
                }
                // float-to-int `as` saturates
                Ok(SignalValue::Int(snap_to_step(v.round() as i32, min, max, step)))
            }
            (SignalKind::Fixed { min, max }, numeric) => {
                let v = numeric.as_f32();
                if !v.is_finite() {
                    return Err(SignalError::NotFinite(self.id));
                }
                Ok(SignalValue::Fixed(v.clamp(min, max)))
            }
        }
    }
}

fn snap_to_step(value: i32, min: i32, max: i32, step: i32) -> i32 {
    let clamped = i64::from(value.clamp(min, max));
    let (min, max, step) = (i64::from(min), i64::from(max), i64::from(step.max(1)));
    let snapped = min + (clamped - min + step / 2) / step * step;
    snapped.min(max) as i32
}

/// Current values of every signal.
#[derive(Debug, Clone)]
pub struct SignalRegistry {
    values: [SignalValue; SIGNAL_COUNT],
}

impl SignalRegistry {
    /// Registry holding each signal's declared starting value.
    pub fn new() -> Self {
        Self {
            values: core::array::from_fn(|i| SIGNAL_SPECS[i].initial),
        }
    }

    /// Validate and store `value`, then encode it into `frames`.
    ///
    /// Returns the value actually stored, after clamping. The frame bytes are
    /// updated before this returns.
    pub fn set(
        &mut self,
        id: SignalId,
        value: SignalValue,
        frames: &mut FrameTable,
    ) -> Result<SignalValue, SignalError> {
        let constrained = id.spec().constrain(value)?;
        encoder::apply(id, constrained, frames)?;
        self.values[id.index()] = constrained;
        Ok(constrained)
    }

    /// Last validated value.
    pub fn get(&self, id: SignalId) -> SignalValue {
        self.values[id.index()]
    }

    /// Re-encode the stored value of `id` without changing it.
    pub fn encode(&self, id: SignalId, frames: &mut FrameTable) -> Result<(), SignalError> {
        encoder::apply(id, self.get(id), frames)?;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalId, SignalValue)> + '_ {
        SignalId::ALL.iter().map(move |id| (*id, self.get(*id)))
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Alarm state machine vocabulary and the persisted event record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DIAMETER_CHANNELS;

/// The five independent alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// Lumps AND necks in the flaw window above their limits
    Defects,
    /// A channel outside the tolerance band
    Diameter,
    /// Spectral peaks above the pulsation threshold
    Pulsation,
    Ovality,
    /// A channel's trailing standard deviation above its limit
    StdDev,
}

impl AlarmKind {
    /// Evaluation order. The lamp under `LampPolicy::LastTransition` follows
    /// the last kind in this order that changed.
    pub const ALL: [Self; 5] = [
        Self::Defects,
        Self::Diameter,
        Self::Pulsation,
        Self::Ovality,
        Self::StdDev,
    ];

    /// Tag stored in event records.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Defects => "defects",
            Self::Diameter => "diameter",
            Self::Pulsation => "pulsation",
            Self::Ovality => "ovality",
            Self::StdDev => "std_dev",
        }
    }

    /// Operator-facing description used in event comments.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Defects => "Too many defects in flaw window",
            Self::Diameter => "Diameter out of tolerance",
            Self::Pulsation => "Diameter pulsation detected",
            Self::Ovality => "High ovality",
            Self::StdDev => "Diameter standard deviation too high",
        }
    }
}

impl std::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// State of one alarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Inactive,
    Active,
}

impl AlarmState {
    pub const fn from_active(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Outcome of evaluating one alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmTransition {
    Entered,
    Exited,
    NoChange,
}

impl AlarmTransition {
    /// Transition from `previous` to `current`.
    pub const fn between(previous: AlarmState, current: AlarmState) -> Self {
        match (previous, current) {
            (AlarmState::Inactive, AlarmState::Active) => Self::Entered,
            (AlarmState::Active, AlarmState::Inactive) => Self::Exited,
            _ => Self::NoChange,
        }
    }

    pub const fn is_edge(self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

/// How the five alarms drive the single common-fault lamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LampPolicy {
    /// The last alarm to change in an evaluation sets the lamp to its own
    /// new state, even if another alarm is still active.
    #[default]
    LastTransition,
    /// Lamp is the OR of all five states.
    Aggregate,
}

/// One alarm transition as written to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Recipe in force when the transition happened
    pub settings_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Distance coordinate (m)
    pub distance: f64,
    pub product: String,
    pub batch: String,
    pub kind: AlarmKind,
    pub diameters: [f64; DIAMETER_CHANNELS],
    /// Lumps inside the flaw window
    pub lumps: u64,
    /// Necks inside the flaw window
    pub necks: u64,
    /// `Entered` or `Exited`
    pub transition: AlarmTransition,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_only_on_edge() {
        use AlarmState::{Active, Inactive};
        assert_eq!(AlarmTransition::between(Inactive, Active), AlarmTransition::Entered);
        assert_eq!(AlarmTransition::between(Active, Inactive), AlarmTransition::Exited);
        assert_eq!(AlarmTransition::between(Active, Active), AlarmTransition::NoChange);
        assert_eq!(AlarmTransition::between(Inactive, Inactive), AlarmTransition::NoChange);
    }

    #[test]
    fn kind_serialises_as_tag() {
        for kind in AlarmKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.tag()));
        }
    }
}

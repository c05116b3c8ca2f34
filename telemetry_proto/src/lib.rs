use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-direction move counts keyed by direction label.
pub type DirectionCounts = BTreeMap<String, u64>;

/// One simulation cycle as reported by the experiment backend.
///
/// The backend emits PascalCase keys (`CycleCount`); camelCase is the
/// canonical form and the one used when re-encoding. Keys this struct does
/// not model are kept in [`Snapshot::extra`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(alias = "CycleCount")]
    pub cycle_count: u64,
    #[serde(alias = "DooderCount")]
    pub dooder_count: u64,
    #[serde(alias = "EnergyCount")]
    pub energy_count: u64,
    #[serde(default, alias = "DirectionCounts")]
    pub direction_counts: DirectionCounts,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new(cycle_count: u64, dooder_count: u64, energy_count: u64) -> Self {
        Self {
            cycle_count,
            dooder_count,
            energy_count,
            ..Default::default()
        }
    }

    pub fn with_direction(mut self, label: impl Into<String>, count: u64) -> Self {
        self.direction_counts.insert(label.into(), count);
        self
    }
}

/// Outbound control message.
///
/// Experiment parameters travel as a bare `{"steps":..,"agents":..}` object,
/// which is what the backend feeds straight into its experiment settings.
/// Everything else is a `{"command":..}` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlFrame {
    Parameters { steps: u32, agents: u32 },
    Signal { command: ControlSignal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSignal {
    Stop,
    Reset,
}

pub fn encode_snapshot_json(snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}

pub fn decode_snapshot_json(data: &[u8]) -> serde_json::Result<Snapshot> {
    serde_json::from_slice(data)
}

pub fn encode_control_json(frame: &ControlFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

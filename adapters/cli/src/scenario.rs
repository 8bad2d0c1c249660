use anyhow::{Context, Result};
use bombsite_core::{
    AgentSnapshot, Board, Constants, DeviceSnapshot, EngineConfig, Team, WorldSnapshot,
};
use serde::Deserialize;

/// One decision tick described as a TOML document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    /// Team the engine plays for.
    pub(crate) side: Team,
    /// Tick index reported to the engine.
    #[serde(default)]
    pub(crate) tick: u32,
    /// Board rows using `#`, `.` and the `s`/`m`/`l`/`v` site symbols.
    pub(crate) map: Vec<String>,
    /// Game constants.
    pub(crate) constants: Constants,
    /// Bot tuning; missing fields fall back to their defaults.
    #[serde(default)]
    pub(crate) config: EngineConfig,
    /// Agents of both teams.
    #[serde(default)]
    pub(crate) agents: Vec<AgentSnapshot>,
    /// Devices already planted.
    #[serde(default)]
    pub(crate) devices: Vec<DeviceSnapshot>,
}

impl Scenario {
    /// Parses a scenario from its TOML text.
    pub(crate) fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("scenario is not valid TOML")
    }

    /// Builds the snapshot handed to the engine.
    pub(crate) fn snapshot(&self) -> Result<WorldSnapshot> {
        let board =
            Board::from_rows(self.map.as_slice()).context("scenario map is malformed")?;
        Ok(WorldSnapshot {
            tick: self.tick,
            board,
            agents: self.agents.clone(),
            devices: self.devices.clone(),
        })
    }
}

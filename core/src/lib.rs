#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the bombsite decision engine.
//!
//! This crate defines the vocabulary that connects the host adapter, the
//! spatial analysis in the world crate and the per-team decision systems. The
//! host hands the engine a [`WorldSnapshot`] every tick, systems evaluate their
//! rule chains against it, and respond exclusively with [`Action`] values. No
//! type in this crate performs I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cardinal directions available to agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Movement toward decreasing row indices.
    North,
    /// Movement toward increasing column indices.
    East,
    /// Movement toward increasing row indices.
    South,
    /// Movement toward decreasing column indices.
    West,
}

impl Direction {
    /// Fixed expansion order shared by every neighbour walk in the engine.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Unit offset expressed as `(row delta, column delta)`.
    #[must_use]
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Self::North => (-1, 0),
            Self::East => (0, 1),
            Self::South => (1, 0),
            Self::West => (0, -1),
        }
    }

    /// Direction pointing the opposite way.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::East => Self::West,
            Self::South => Self::North,
            Self::West => Self::East,
        }
    }
}

/// Location of a single grid cell expressed as row and column coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    row: u32,
    column: u32,
}

impl CellCoord {
    /// Creates a new grid cell coordinate.
    #[must_use]
    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Zero-based row index of the cell.
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.row
    }

    /// Zero-based column index of the cell.
    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }

    /// Computes the Manhattan distance between two cell coordinates.
    #[must_use]
    pub fn manhattan_distance(self, other: CellCoord) -> u32 {
        self.row.abs_diff(other.row) + self.column.abs_diff(other.column)
    }

    /// Cell reached by taking one step in `direction`.
    ///
    /// Returns `None` when the step would leave the non-negative quadrant.
    /// Upper bounds are the board's concern.
    #[must_use]
    pub fn step(self, direction: Direction) -> Option<CellCoord> {
        match direction {
            Direction::North => Some(Self::new(self.row.checked_sub(1)?, self.column)),
            Direction::East => Some(Self::new(self.row, self.column.checked_add(1)?)),
            Direction::South => Some(Self::new(self.row.checked_add(1)?, self.column)),
            Direction::West => Some(Self::new(self.row, self.column.checked_sub(1)?)),
        }
    }

    /// Direction of the single cardinal step leading from `self` to `other`.
    ///
    /// Any delta other than a unit cardinal offset yields `None`.
    #[must_use]
    pub fn direction_to(self, other: CellCoord) -> Option<Direction> {
        if self.manhattan_distance(other) != 1 {
            return None;
        }

        if other.row < self.row {
            Some(Direction::North)
        } else if other.row > self.row {
            Some(Direction::South)
        } else if other.column > self.column {
            Some(Direction::East)
        } else {
            Some(Direction::West)
        }
    }

    /// Reports whether the two cells are one cardinal step apart.
    #[must_use]
    pub fn is_adjacent(self, other: CellCoord) -> bool {
        self.manhattan_distance(other) == 1
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// Bombsite variants that carry different score coefficients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteVariant {
    /// Cheapest site to plant on.
    Small,
    /// Second tier site.
    Medium,
    /// Third tier site.
    Large,
    /// Most valuable site.
    Vast,
}

/// Kind of a single board cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Walkable floor.
    Empty,
    /// Impassable wall.
    Wall,
    /// Objective cell attackers plant on and defenders protect.
    Bombsite(SiteVariant),
}

impl CellKind {
    /// Reports whether the cell is an objective of any variant.
    #[must_use]
    pub const fn is_bombsite(self) -> bool {
        matches!(self, Self::Bombsite(_))
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '.' => Some(Self::Empty),
            '#' => Some(Self::Wall),
            's' => Some(Self::Bombsite(SiteVariant::Small)),
            'm' => Some(Self::Bombsite(SiteVariant::Medium)),
            'l' => Some(Self::Bombsite(SiteVariant::Large)),
            'v' => Some(Self::Bombsite(SiteVariant::Vast)),
            _ => None,
        }
    }
}

/// Reasons a board description may be rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BoardError {
    /// The board had no rows or no columns.
    #[error("board must contain at least one row and one column")]
    Empty,
    /// A row did not match the width of the first row.
    #[error("row {row} has {found} cells but the board is {expected} cells wide")]
    Ragged {
        /// Index of the offending row.
        row: usize,
        /// Width established by the first row.
        expected: usize,
        /// Width of the offending row.
        found: usize,
    },
    /// A symbol did not map to any known cell kind.
    #[error("unknown cell symbol '{symbol}' at row {row}, column {column}")]
    UnknownSymbol {
        /// Row of the offending symbol.
        row: usize,
        /// Column of the offending symbol.
        column: usize,
        /// The symbol that failed to parse.
        symbol: char,
    },
    /// The flat cell buffer did not match the declared dimensions.
    #[error("expected {expected} cells for the declared dimensions, found {found}")]
    SizeMismatch {
        /// Cell count implied by the dimensions.
        expected: usize,
        /// Cell count actually supplied.
        found: usize,
    },
}

/// Dense, row-major grid of cell kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    rows: u32,
    columns: u32,
    cells: Vec<CellKind>,
}

impl Board {
    /// Creates a board from a row-major cell buffer.
    pub fn new(rows: u32, columns: u32, cells: Vec<CellKind>) -> Result<Self, BoardError> {
        if rows == 0 || columns == 0 {
            return Err(BoardError::Empty);
        }

        let expected = rows as usize * columns as usize;
        if cells.len() != expected {
            return Err(BoardError::SizeMismatch {
                expected,
                found: cells.len(),
            });
        }

        Ok(Self {
            rows,
            columns,
            cells,
        })
    }

    /// Parses a board from text rows.
    ///
    /// `#` is a wall, `.` empty floor, and `s`, `m`, `l`, `v` are small,
    /// medium, large and vast bombsites.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Result<Self, BoardError> {
        let Some(first) = rows.first() else {
            return Err(BoardError::Empty);
        };
        let width = first.as_ref().chars().count();
        if width == 0 {
            return Err(BoardError::Empty);
        }

        let mut cells = Vec::with_capacity(width * rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let found = row.chars().count();
            if found != width {
                return Err(BoardError::Ragged {
                    row: row_index,
                    expected: width,
                    found,
                });
            }

            for (column_index, symbol) in row.chars().enumerate() {
                let kind = CellKind::from_symbol(symbol).ok_or(BoardError::UnknownSymbol {
                    row: row_index,
                    column: column_index,
                    symbol,
                })?;
                cells.push(kind);
            }
        }

        let rows = u32::try_from(rows.len()).map_err(|_| BoardError::Empty)?;
        let columns = u32::try_from(width).map_err(|_| BoardError::Empty)?;
        Self::new(rows, columns, cells)
    }

    /// Number of rows contained in the board.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns contained in the board.
    #[must_use]
    pub const fn columns(&self) -> u32 {
        self.columns
    }

    /// Total number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Reports whether the board holds no cells. Always false for a valid board.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Reports whether the cell lies inside the board.
    #[must_use]
    pub const fn contains(&self, cell: CellCoord) -> bool {
        cell.row() < self.rows && cell.column() < self.columns
    }

    /// Dense row-major index of the cell, if it lies inside the board.
    #[must_use]
    pub fn index(&self, cell: CellCoord) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        let row = usize::try_from(cell.row()).ok()?;
        let column = usize::try_from(cell.column()).ok()?;
        let width = usize::try_from(self.columns).ok()?;
        row.checked_mul(width)?.checked_add(column)
    }

    /// Cell located at the provided dense index.
    #[must_use]
    pub fn cell_at(&self, index: usize) -> Option<CellCoord> {
        if index >= self.cells.len() {
            return None;
        }
        let width = usize::try_from(self.columns).ok()?;
        let row = u32::try_from(index / width).ok()?;
        let column = u32::try_from(index % width).ok()?;
        Some(CellCoord::new(row, column))
    }

    /// Kind of the cell, or `None` when out of bounds.
    #[must_use]
    pub fn kind(&self, cell: CellCoord) -> Option<CellKind> {
        self.index(cell)
            .and_then(|index| self.cells.get(index).copied())
    }

    /// Reports whether the cell blocks movement and sound. Out of bounds counts as wall.
    #[must_use]
    pub fn is_wall(&self, cell: CellCoord) -> bool {
        self.kind(cell).map_or(true, |kind| kind == CellKind::Wall)
    }

    /// Reports whether the cell is plain walkable floor.
    #[must_use]
    pub fn is_floor(&self, cell: CellCoord) -> bool {
        self.kind(cell) == Some(CellKind::Empty)
    }

    /// Site variant of the cell, if it is a bombsite.
    #[must_use]
    pub fn site_variant(&self, cell: CellCoord) -> Option<SiteVariant> {
        match self.kind(cell)? {
            CellKind::Bombsite(variant) => Some(variant),
            CellKind::Empty | CellKind::Wall => None,
        }
    }

    /// Overwrites the kind of an in-bounds cell. Returns the previous kind.
    pub fn set_kind(&mut self, cell: CellCoord, kind: CellKind) -> Option<CellKind> {
        let index = self.index(cell)?;
        let slot = self.cells.get_mut(index)?;
        Some(std::mem::replace(slot, kind))
    }

    /// All bombsite cells in row-major order.
    #[must_use]
    pub fn bombsites(&self) -> Vec<CellCoord> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.is_bombsite())
            .filter_map(|(index, _)| self.cell_at(index))
            .collect()
    }

    /// In-bounds cardinal neighbours of `cell` in [`Direction::ALL`] order.
    pub fn neighbors(&self, cell: CellCoord) -> impl Iterator<Item = CellCoord> + '_ {
        Direction::ALL
            .into_iter()
            .filter_map(move |direction| cell.step(direction))
            .filter(move |neighbor| self.contains(*neighbor))
    }
}

/// Teams competing in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    /// Team that hunts planted devices.
    Defender,
    /// Team that plants devices on bombsites.
    Attacker,
}

/// Unique identifier assigned to an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(u32);

impl AgentId {
    /// Creates a new agent identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Life status of an agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// The agent takes part in the match.
    #[default]
    Alive,
    /// The agent was eliminated and accepts no actions.
    Dead,
}

/// Audibility bands, declared in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundIntensity {
    /// Closest band.
    Strong,
    /// Middle band.
    Normal,
    /// Farthest band.
    Weak,
}

impl SoundIntensity {
    /// All bands from highest to lowest priority.
    pub const ALL: [SoundIntensity; 3] = [
        SoundIntensity::Strong,
        SoundIntensity::Normal,
        SoundIntensity::Weak,
    ];

    /// Dense index of the band, matching [`SoundIntensity::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Strong => 0,
            Self::Normal => 1,
            Self::Weak => 2,
        }
    }
}

/// Sounds an agent perceives this tick on the two independent channels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeardSounds {
    /// Intensities of device ticking sounds.
    pub devices: Vec<SoundIntensity>,
    /// Intensities of enemy footsteps.
    pub footsteps: Vec<SoundIntensity>,
}

/// Immutable representation of a single agent's state for one tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Unique identifier assigned to the agent.
    pub id: AgentId,
    /// Team the agent plays for.
    pub team: Team,
    /// Grid cell currently occupied by the agent.
    pub cell: CellCoord,
    /// Whether the agent is still in play.
    #[serde(default)]
    pub status: AgentStatus,
    /// Ticks left on an in-progress plant or defuse; `None` when idle.
    #[serde(default)]
    pub operation_remaining: Option<u32>,
    /// Sounds heard this tick.
    #[serde(default)]
    pub heard: HeardSounds,
}

impl AgentSnapshot {
    /// Reports whether the agent is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.status == AgentStatus::Alive
    }

    /// Reports whether a plant or defuse is in progress.
    #[must_use]
    pub fn is_operating(&self) -> bool {
        self.operation_remaining.is_some()
    }
}

/// Immutable representation of a planted device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Bombsite cell the device was planted on.
    pub cell: CellCoord,
    /// Ticks until detonation.
    pub explosion_remaining: u32,
    /// Defender currently defusing the device, if any.
    #[serde(default)]
    pub defuser: Option<AgentId>,
    /// Attacker that planted the device, if known.
    #[serde(default)]
    pub planter: Option<AgentId>,
}

/// Complete world state delivered by the host each tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldSnapshot {
    /// Index of the current tick.
    pub tick: u32,
    /// Current board, including destroyed sites turned into floor.
    pub board: Board,
    /// Every agent the host reports, alive or dead.
    pub agents: Vec<AgentSnapshot>,
    /// Every device currently planted.
    pub devices: Vec<DeviceSnapshot>,
}

impl WorldSnapshot {
    /// Alive agents of `team` in ascending id order.
    #[must_use]
    pub fn alive_agents(&self, team: Team) -> Vec<&AgentSnapshot> {
        let mut agents: Vec<_> = self
            .agents
            .iter()
            .filter(|agent| agent.team == team && agent.is_alive())
            .collect();
        agents.sort_by_key(|agent| agent.id);
        agents
    }

    /// Device planted on `cell`, if any.
    #[must_use]
    pub fn device_at(&self, cell: CellCoord) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|device| device.cell == cell)
    }

    /// Reports whether an alive agent other than `except` stands on `cell`.
    #[must_use]
    pub fn is_occupied(&self, cell: CellCoord, except: AgentId) -> bool {
        self.agents
            .iter()
            .any(|agent| agent.id != except && agent.is_alive() && agent.cell == cell)
    }
}

/// Hop thresholds of the three audibility bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundRanges {
    /// Last hop count heard as [`SoundIntensity::Strong`].
    pub strong: u32,
    /// Last hop count heard as [`SoundIntensity::Normal`].
    pub normal: u32,
    /// Last hop count heard as [`SoundIntensity::Weak`].
    pub weak: u32,
}

impl SoundRanges {
    /// Band heard at `hops` from a source, if any.
    #[must_use]
    pub const fn band_for(&self, hops: u32) -> Option<SoundIntensity> {
        if hops == 0 {
            None
        } else if hops <= self.strong {
            Some(SoundIntensity::Strong)
        } else if hops <= self.normal {
            Some(SoundIntensity::Normal)
        } else if hops <= self.weak {
            Some(SoundIntensity::Weak)
        } else {
            None
        }
    }

    /// Reports whether the thresholds are non-decreasing.
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.strong <= self.normal && self.normal <= self.weak
    }
}

/// Per-variant score coefficients.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteScores {
    /// Coefficient of small sites.
    pub small: f64,
    /// Coefficient of medium sites.
    pub medium: f64,
    /// Coefficient of large sites.
    pub large: f64,
    /// Coefficient of vast sites.
    pub vast: f64,
}

impl SiteScores {
    /// Coefficient attached to the variant.
    #[must_use]
    pub const fn coefficient(&self, variant: SiteVariant) -> f64 {
        match variant {
            SiteVariant::Small => self.small,
            SiteVariant::Medium => self.medium,
            SiteVariant::Large => self.large,
            SiteVariant::Vast => self.vast,
        }
    }
}

impl Default for SiteScores {
    fn default() -> Self {
        Self {
            small: 1.0,
            medium: 1.0,
            large: 1.0,
            vast: 1.0,
        }
    }
}

/// Static match constants supplied by the game at start.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constants {
    /// Manhattan radius within which defenders see.
    pub defender_vision: u32,
    /// Manhattan radius within which attackers see.
    pub attacker_vision: u32,
    /// Ticks a defuse takes once started.
    pub defuse_duration: u32,
    /// Ticks a plant takes once started.
    pub plant_duration: u32,
    /// Device sound band thresholds.
    pub sound_ranges: SoundRanges,
    /// Score coefficients per site variant.
    #[serde(default)]
    pub site_scores: SiteScores,
}

impl Constants {
    /// Vision radius of `team`.
    #[must_use]
    pub const fn vision(&self, team: Team) -> u32 {
        match team {
            Team::Defender => self.defender_vision,
            Team::Attacker => self.attacker_vision,
        }
    }
}

/// Tuning knobs of the bot that are not part of the game rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks an attacker stays alert after escaping or aborting a plant.
    pub alert_cooldown_ticks: u32,
    /// Radius around an alert centre whose sites attackers avoid.
    pub alert_avoid_radius: u32,
    /// Radius around a nearly-detonating device that attackers evacuate.
    pub evasion_radius: u32,
    /// Fuse length at or below which a nearby device triggers evasion.
    pub evasion_fuse_threshold: u32,
    /// Defuse ticks left at or above which a defender is ignored as a chaser.
    pub persistent_defuse_threshold: u32,
    /// Plant ticks left at or above which a strong footstep aborts the plant.
    pub footstep_abort_min_remaining: u32,
    /// Ticks before a defender re-investigates a site it found empty.
    pub reinvestigate_cooldown: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_ticks: 3,
            alert_avoid_radius: 3,
            evasion_radius: 2,
            evasion_fuse_threshold: 2,
            persistent_defuse_threshold: 2,
            footstep_abort_min_remaining: 2,
            reinvestigate_cooldown: 12,
        }
    }
}

/// Kinds of actions an agent can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Step into the adjacent cell.
    Move,
    /// Start planting on the adjacent bombsite.
    Plant,
    /// Start defusing the device on the adjacent bombsite.
    Defuse,
}

/// Reasons an action cannot be constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The target cell is not one cardinal step from the agent.
    #[error("cell {to} is not one cardinal step from {from}")]
    NotAdjacent {
        /// Cell occupied by the agent.
        from: CellCoord,
        /// Requested target cell.
        to: CellCoord,
    },
}

/// Single command issued for one agent in one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Agent performing the action.
    pub agent: AgentId,
    /// What the agent does.
    pub kind: ActionKind,
    /// Direction toward the affected cell.
    pub direction: Direction,
}

impl Action {
    /// Builds an action aimed from `from` at the adjacent cell `to`.
    pub fn toward(
        agent: AgentId,
        kind: ActionKind,
        from: CellCoord,
        to: CellCoord,
    ) -> Result<Self, ActionError> {
        let direction = from
            .direction_to(to)
            .ok_or(ActionError::NotAdjacent { from, to })?;
        Ok(Self {
            agent,
            kind,
            direction,
        })
    }
}

/// Result of evaluating one rule of a decision chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule does not apply; evaluation continues with the next rule.
    NotApplicable,
    /// The rule took responsibility for the tick, optionally issuing an action.
    Handled(Option<Action>),
}

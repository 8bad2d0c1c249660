#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Static spatial analysis of the bombsite board.
//!
//! The world crate owns the two grid algorithms every decision system builds
//! on: breadth-first [`navigation`] under per-query exclusions, and the graded
//! [`sound`] propagation that maps audible device intensities back to the
//! bombsite that produced them.

pub mod navigation;
pub mod sound;

pub use navigation::{Arrival, DistanceField, PathPlan, Pathfinder, PlanStep};
pub use sound::SignalMap;

use bombsite_core::{AgentId, Board, CellCoord, WorldSnapshot};

/// Query helpers shared by the decision systems.
pub mod query {
    use super::{AgentId, Board, CellCoord, WorldSnapshot};
    use bombsite_core::Team;
    use std::collections::BTreeSet;

    /// Cells an agent must not walk through: every bombsite plus the cells of
    /// its alive teammates.
    #[must_use]
    pub fn walking_exclusions(
        snapshot: &WorldSnapshot,
        sites: &[CellCoord],
        team: Team,
        agent: AgentId,
    ) -> BTreeSet<CellCoord> {
        let mut excluded: BTreeSet<CellCoord> = sites.iter().copied().collect();
        excluded.extend(
            snapshot
                .agents
                .iter()
                .filter(|other| other.team == team && other.id != agent && other.is_alive())
                .map(|other| other.cell),
        );
        excluded
    }

    /// Reports whether an agent may step onto `cell` this tick.
    #[must_use]
    pub fn is_enterable(
        board: &Board,
        snapshot: &WorldSnapshot,
        cell: CellCoord,
        agent: AgentId,
    ) -> bool {
        board.is_floor(cell) && !snapshot.is_occupied(cell, agent)
    }
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Two-call entry point of the bombsite bot.
//!
//! [`initialize`] validates the match constants and builds the static
//! analyses once; [`decide`] is called every tick with the live snapshot and
//! fills a buffer with at most one action per alive controlled agent. The
//! full-grid analyses (sound map, site allocation, patrol routes) are only
//! recomputed when a bombsite is destroyed or the alive defender roster
//! changes.

use std::collections::BTreeSet;

use bombsite_core::{
    Action, AgentId, Board, CellCoord, CellKind, Constants, EngineConfig, Team, WorldSnapshot,
};
use bombsite_system_allocation::{Assignment, ObjectiveAllocator};
use bombsite_system_defense::{Defense, DefenseInputs};
use bombsite_system_offense::{Offense, OffenseInputs};
use bombsite_system_patrol::{PatrolPlanner, PatrolRoute};
use bombsite_world::SignalMap;
use thiserror::Error;
use tracing::{info, warn};

/// Reasons the engine refuses to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Sound band thresholds are not non-decreasing.
    #[error("sound ranges must satisfy strong <= normal <= weak (got {strong}, {normal}, {weak})")]
    InvalidSoundRanges {
        /// Strong threshold supplied.
        strong: u32,
        /// Normal threshold supplied.
        normal: u32,
        /// Weak threshold supplied.
        weak: u32,
    },
}

/// Cross-tick state of one team's bot.
#[derive(Debug)]
pub struct Engine {
    side: Team,
    constants: Constants,
    config: EngineConfig,
    board: Board,
    sites: Vec<CellCoord>,
    signal_map: SignalMap,
    allocator: ObjectiveAllocator,
    planner: PatrolPlanner,
    assignment: Assignment,
    roster: Option<BTreeSet<AgentId>>,
    defense: Defense,
    offense: Offense,
}

impl Engine {
    /// Team the engine plays for.
    #[must_use]
    pub const fn side(&self) -> Team {
        self.side
    }

    /// Bombsites that have not been destroyed yet.
    #[must_use]
    pub fn sites(&self) -> &[CellCoord] {
        &self.sites
    }

    /// Sound lookup over the surviving bombsites.
    #[must_use]
    pub fn signal_map(&self) -> &SignalMap {
        &self.signal_map
    }

    /// Current site ownership among defenders.
    #[must_use]
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Defender-side state.
    #[must_use]
    pub fn defense(&self) -> &Defense {
        &self.defense
    }

    /// Attacker-side state.
    #[must_use]
    pub fn offense(&self) -> &Offense {
        &self.offense
    }

    fn sync_sites(&mut self, board: &Board) -> bool {
        if board.rows() != self.board.rows() || board.columns() != self.board.columns() {
            warn!(
                rows = board.rows(),
                columns = board.columns(),
                "snapshot board does not match the initial map"
            );
            return false;
        }

        let destroyed: Vec<CellCoord> = self
            .sites
            .iter()
            .copied()
            .filter(|site| board.site_variant(*site).is_none())
            .collect();
        if destroyed.is_empty() {
            return false;
        }

        for site in &destroyed {
            let _ = self.board.set_kind(*site, CellKind::Empty);
            info!(site = %site, "bombsite destroyed");
        }
        self.sites = self.board.bombsites();
        self.signal_map = SignalMap::build(&self.board, &self.sites, self.constants.sound_ranges);
        true
    }

    fn reallocate(&mut self, snapshot: &WorldSnapshot, roster: BTreeSet<AgentId>) {
        let defenders: Vec<(AgentId, CellCoord)> = snapshot
            .alive_agents(Team::Defender)
            .into_iter()
            .map(|agent| (agent.id, agent.cell))
            .collect();

        self.assignment = self
            .allocator
            .allocate(&self.board, &self.sites, &defenders);

        let mut routes: Vec<(AgentId, PatrolRoute)> = Vec::with_capacity(defenders.len());
        for (id, cell) in &defenders {
            let route = self.planner.plan(
                &self.board,
                &self.signal_map,
                self.assignment.sites_for(*id),
                *cell,
            );
            routes.push((*id, route));
        }
        self.defense.install_patrols(routes);

        info!(
            defenders = defenders.len(),
            sites = self.sites.len(),
            assigned = self.assignment.site_count(),
            "reallocated bombsites"
        );
        self.roster = Some(roster);
    }
}

/// Validates the constants and prepares the static analyses of `board`.
pub fn initialize(
    side: Team,
    board: Board,
    constants: Constants,
    config: EngineConfig,
) -> Result<Engine, EngineError> {
    let ranges = constants.sound_ranges;
    if !ranges.is_ordered() {
        return Err(EngineError::InvalidSoundRanges {
            strong: ranges.strong,
            normal: ranges.normal,
            weak: ranges.weak,
        });
    }

    let sites = board.bombsites();
    let signal_map = SignalMap::build(&board, &sites, ranges);
    info!(
        ?side,
        rows = board.rows(),
        columns = board.columns(),
        sites = sites.len(),
        "engine initialised"
    );

    Ok(Engine {
        side,
        constants,
        config,
        board,
        sites,
        signal_map,
        allocator: ObjectiveAllocator::new(),
        planner: PatrolPlanner::new(),
        assignment: Assignment::default(),
        roster: None,
        defense: Defense::new(),
        offense: Offense::new(),
    })
}

/// Chooses this tick's actions for every alive agent of the engine's side.
///
/// `out` is cleared first. The call never fails: agents without a usable plan
/// simply get no action.
pub fn decide(engine: &mut Engine, snapshot: &WorldSnapshot, out: &mut Vec<Action>) {
    out.clear();
    let sites_changed = engine.sync_sites(&snapshot.board);

    match engine.side {
        Team::Defender => {
            let roster: BTreeSet<AgentId> = snapshot
                .alive_agents(Team::Defender)
                .into_iter()
                .map(|agent| agent.id)
                .collect();
            if sites_changed || engine.roster.as_ref() != Some(&roster) {
                if let Some(previous) = &engine.roster {
                    info!(
                        before = previous.len(),
                        after = roster.len(),
                        "defender roster changed"
                    );
                }
                engine.reallocate(snapshot, roster);
            }

            let inputs = DefenseInputs {
                snapshot,
                constants: &engine.constants,
                config: &engine.config,
                signal_map: &engine.signal_map,
                assignment: &engine.assignment,
                sites: &engine.sites,
            };
            engine.defense.handle(&inputs, out);
        }
        Team::Attacker => {
            let inputs = OffenseInputs {
                snapshot,
                constants: &engine.constants,
                config: &engine.config,
                sites: &engine.sites,
            };
            engine.offense.handle(&inputs, out);
        }
    }
}

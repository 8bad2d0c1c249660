#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Attacker decision chain: escape pursuers, evade detonations, plant.

use std::collections::{BTreeMap, BTreeSet};

use bombsite_core::{
    Action, ActionKind, AgentId, AgentSnapshot, CellCoord, Constants, Direction, EngineConfig,
    RuleOutcome, SoundIntensity, Team, WorldSnapshot,
};
use bombsite_world::{query, Arrival, PathPlan, Pathfinder, PlanStep};
use tracing::{debug, warn};

/// Read-only inputs shared by every attacker evaluated in one tick.
#[derive(Clone, Copy, Debug)]
pub struct OffenseInputs<'a> {
    /// World state delivered by the host.
    pub snapshot: &'a WorldSnapshot,
    /// Match constants.
    pub constants: &'a Constants,
    /// Bot tuning.
    pub config: &'a EngineConfig,
    /// Bombsites that still exist.
    pub sites: &'a [CellCoord],
}

/// Zone an attacker recently fled from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Alert {
    /// Cell the danger came from.
    pub center: CellCoord,
    /// Decisions left before the alert lapses.
    pub remaining: u32,
}

/// Cross-tick state of the attacking team.
#[derive(Debug, Default)]
pub struct Offense {
    agents: BTreeMap<AgentId, AttackerState>,
    reservations: BTreeMap<CellCoord, AgentId>,
    pathfinder: Pathfinder,
}

#[derive(Debug, Default)]
struct AttackerState {
    plan: Option<PathPlan>,
    alert: Option<Alert>,
}

impl Offense {
    /// Creates an offense with no reservations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attacker that reserved `site`.
    #[must_use]
    pub fn reservation(&self, site: CellCoord) -> Option<AgentId> {
        self.reservations.get(&site).copied()
    }

    /// Active alert of `agent`.
    #[must_use]
    pub fn alert(&self, agent: AgentId) -> Option<Alert> {
        self.agents.get(&agent).and_then(|state| state.alert)
    }

    /// Evaluates the rule chain for every alive attacker in ascending id
    /// order and appends the chosen actions to `out`.
    pub fn handle(&mut self, inputs: &OffenseInputs<'_>, out: &mut Vec<Action>) {
        let attackers = inputs.snapshot.alive_agents(Team::Attacker);
        self.prune(inputs, &attackers);

        for agent in attackers {
            let alerts: Vec<Alert> = self
                .agents
                .values()
                .filter_map(|state| state.alert)
                .collect();
            let exclusions =
                query::walking_exclusions(inputs.snapshot, inputs.sites, Team::Attacker, agent.id);
            let mut turn = Turn {
                inputs,
                agent,
                state: self.agents.entry(agent.id).or_default(),
                reservations: &mut self.reservations,
                pathfinder: &mut self.pathfinder,
                exclusions,
                alerts,
            };

            for (name, rule) in RULES {
                if let RuleOutcome::Handled(action) = rule(&mut turn) {
                    debug!(agent = agent.id.get(), rule = name, ?action, "attacker rule fired");
                    out.extend(action);
                    break;
                }
            }
        }
    }

    fn prune(&mut self, inputs: &OffenseInputs<'_>, attackers: &[&AgentSnapshot]) {
        let alive: BTreeSet<AgentId> = attackers.iter().map(|agent| agent.id).collect();
        let snapshot = inputs.snapshot;

        self.agents.retain(|id, _| alive.contains(id));
        self.reservations.retain(|site, owner| {
            alive.contains(&*owner)
                && inputs.sites.contains(site)
                && snapshot.device_at(*site).is_none()
        });

        for state in self.agents.values_mut() {
            state.alert = state.alert.and_then(|alert| {
                let remaining = alert.remaining.saturating_sub(1);
                (remaining > 0).then_some(Alert {
                    center: alert.center,
                    remaining,
                })
            });
        }
    }
}

struct Turn<'a> {
    inputs: &'a OffenseInputs<'a>,
    agent: &'a AgentSnapshot,
    state: &'a mut AttackerState,
    reservations: &'a mut BTreeMap<CellCoord, AgentId>,
    pathfinder: &'a mut Pathfinder,
    exclusions: BTreeSet<CellCoord>,
    alerts: Vec<Alert>,
}

impl Turn<'_> {
    fn act(&self, kind: ActionKind, target: CellCoord) -> Option<Action> {
        match Action::toward(self.agent.id, kind, self.agent.cell, target) {
            Ok(action) => Some(action),
            Err(error) => {
                warn!(agent = self.agent.id.get(), %error, "rejected attacker action");
                None
            }
        }
    }

    fn can_enter(&self, cell: CellCoord) -> bool {
        let snapshot = self.inputs.snapshot;
        query::is_enterable(&snapshot.board, snapshot, cell, self.agent.id)
    }

    fn step_into(&self, cell: CellCoord) -> RuleOutcome {
        if self.can_enter(cell) {
            RuleOutcome::Handled(self.act(ActionKind::Move, cell))
        } else {
            RuleOutcome::Handled(None)
        }
    }

    fn visible_defenders(&self) -> impl Iterator<Item = &AgentSnapshot> + '_ {
        let vision = self.inputs.constants.attacker_vision;
        let origin = self.agent.cell;
        self.inputs
            .snapshot
            .agents
            .iter()
            .filter(move |other| other.team == Team::Defender && other.is_alive())
            .filter(move |other| other.cell.manhattan_distance(origin) <= vision)
    }

    fn release_reservation(&mut self) {
        let id = self.agent.id;
        self.reservations.retain(|_, owner| *owner != id);
    }

    fn abandon(&mut self, center: CellCoord) {
        self.state.plan = None;
        self.release_reservation();
        self.state.alert = Some(Alert {
            center,
            remaining: self.inputs.config.alert_cooldown_ticks,
        });
        self.alerts.push(Alert {
            center,
            remaining: self.inputs.config.alert_cooldown_ticks,
        });
    }

    /// Walking exclusions plus visible defenders and the ring around any of
    /// them that is busy defusing.
    fn blocked_cells(&self) -> BTreeSet<CellCoord> {
        let board = &self.inputs.snapshot.board;
        let mut blocked = self.exclusions.clone();
        for defender in self.visible_defenders() {
            let _ = blocked.insert(defender.cell);
            if defender.is_operating() {
                blocked.extend(board.neighbors(defender.cell));
            }
        }
        blocked
    }

    /// Cheapest free site and the path to it. Cost is hop distance divided by
    /// the site's score coefficient.
    fn best_site(&mut self, skip: Option<CellCoord>) -> Option<(CellCoord, PathPlan)> {
        let inputs = self.inputs;
        let id = self.agent.id;
        let origin = self.agent.cell;
        let avoid_radius = inputs.config.alert_avoid_radius;
        let blocked = self.blocked_cells();

        let field = self
            .pathfinder
            .flood(&inputs.snapshot.board, origin, |cell| blocked.contains(&cell));

        let (site, _) = inputs
            .sites
            .iter()
            .copied()
            .filter(|site| Some(*site) != skip)
            .filter(|site| self.reservations.get(site).map_or(true, |owner| *owner == id))
            .filter(|site| inputs.snapshot.device_at(*site).is_none())
            .filter(|site| {
                !self
                    .alerts
                    .iter()
                    .any(|alert| alert.center.manhattan_distance(*site) <= avoid_radius)
            })
            .filter_map(|site| {
                let coefficient = inputs
                    .snapshot
                    .board
                    .site_variant(site)
                    .map(|variant| inputs.constants.site_scores.coefficient(variant))?;
                if coefficient <= 0.0 {
                    return None;
                }
                let hops = if origin.is_adjacent(site) {
                    0
                } else {
                    field.adjacent_distance(site)?
                };
                Some((site, f64::from(hops) / coefficient))
            })
            .min_by(|(left_site, left), (right_site, right)| {
                left.total_cmp(right).then_with(|| left_site.cmp(right_site))
            })?;

        let plan = self.pathfinder.find_path(
            &inputs.snapshot.board,
            origin,
            site,
            Arrival::Adjacent,
            |cell| blocked.contains(&cell),
        )?;
        Some((site, plan))
    }

    fn commit(&mut self, site: CellCoord, mut plan: PathPlan) -> RuleOutcome {
        self.release_reservation();
        let _ = self.reservations.insert(site, self.agent.id);
        let step = plan.advance(self.agent.cell);
        self.state.plan = Some(plan);
        match step {
            PlanStep::Next(cell) => self.step_into(cell),
            PlanStep::Arrived | PlanStep::Deviated => {
                RuleOutcome::Handled(self.act(ActionKind::Plant, site))
            }
        }
    }
}

/// Directions that move `agent` away from `threat`, most preferred first.
///
/// The axis along which the threat is closer is escaped first. A zero
/// component on an axis offers both directions along it.
#[must_use]
pub fn escape_directions(agent: CellCoord, threat: CellCoord) -> Vec<Direction> {
    let row_delta = i64::from(agent.row()) - i64::from(threat.row());
    let column_delta = i64::from(agent.column()) - i64::from(threat.column());

    let row_axis: &[Direction] = match row_delta.signum() {
        -1 => &[Direction::North],
        1 => &[Direction::South],
        _ => &[Direction::North, Direction::South],
    };
    let column_axis: &[Direction] = match column_delta.signum() {
        -1 => &[Direction::West],
        1 => &[Direction::East],
        _ => &[Direction::East, Direction::West],
    };

    let (first, second) = if row_delta.abs() > column_delta.abs() {
        (column_axis, row_axis)
    } else {
        (row_axis, column_axis)
    };
    first.iter().chain(second).copied().collect()
}

type AttackerRule = fn(&mut Turn<'_>) -> RuleOutcome;

const RULES: [(&str, AttackerRule); 5] = [
    ("escape_threats", escape_threats),
    ("evade_detonation", evade_detonation),
    ("continue_plant", continue_plant),
    ("continue_site_path", continue_site_path),
    ("choose_site", choose_site),
];

fn escape_threats(turn: &mut Turn<'_>) -> RuleOutcome {
    let origin = turn.agent.cell;
    let persistent = turn.inputs.config.persistent_defuse_threshold;

    let mut threats: Vec<&AgentSnapshot> = turn
        .visible_defenders()
        .filter(|defender| {
            defender
                .operation_remaining
                .map_or(true, |remaining| remaining < persistent)
        })
        .collect();
    threats.sort_by_key(|defender| (defender.cell.manhattan_distance(origin), defender.id));

    let Some(nearest) = threats.first().map(|defender| defender.cell) else {
        return RuleOutcome::NotApplicable;
    };

    let mut directions = escape_directions(origin, nearest);
    for threat in threats.iter().skip(1) {
        let acceptable = escape_directions(origin, threat.cell);
        directions.retain(|direction| acceptable.contains(direction));
    }

    let escape = directions
        .into_iter()
        .filter_map(|direction| origin.step(direction))
        .find(|cell| turn.can_enter(*cell));

    debug!(
        agent = turn.agent.id.get(),
        threats = threats.len(),
        nearest = %nearest,
        "escaping defenders"
    );
    turn.abandon(nearest);
    match escape {
        Some(cell) => RuleOutcome::Handled(turn.act(ActionKind::Move, cell)),
        None => RuleOutcome::Handled(None),
    }
}

fn evade_detonation(turn: &mut Turn<'_>) -> RuleOutcome {
    let origin = turn.agent.cell;
    let config = turn.inputs.config;
    let imminent: Vec<CellCoord> = turn
        .inputs
        .snapshot
        .devices
        .iter()
        .filter(|device| device.explosion_remaining <= config.evasion_fuse_threshold)
        .filter(|device| device.cell.manhattan_distance(origin) <= config.evasion_radius)
        .map(|device| device.cell)
        .collect();
    if imminent.is_empty() {
        return RuleOutcome::NotApplicable;
    }

    let clearance = |cell: CellCoord| {
        imminent
            .iter()
            .map(|device| device.manhattan_distance(cell))
            .min()
            .unwrap_or(u32::MAX)
    };
    let current = clearance(origin);

    let mut best: Option<(u32, CellCoord)> = None;
    for cell in turn.inputs.snapshot.board.neighbors(origin) {
        if !turn.can_enter(cell) {
            continue;
        }
        let score = clearance(cell);
        if score > current && best.map_or(true, |(top, _)| score > top) {
            best = Some((score, cell));
        }
    }

    match best {
        Some((_, cell)) => RuleOutcome::Handled(turn.act(ActionKind::Move, cell)),
        None => RuleOutcome::Handled(None),
    }
}

fn continue_plant(turn: &mut Turn<'_>) -> RuleOutcome {
    let Some(remaining) = turn.agent.operation_remaining else {
        return RuleOutcome::NotApplicable;
    };

    let pursued = turn.agent.heard.footsteps.contains(&SoundIntensity::Strong);
    if !pursued || remaining < turn.inputs.config.footstep_abort_min_remaining {
        return RuleOutcome::Handled(None);
    }

    let id = turn.agent.id;
    let abandoned = turn
        .reservations
        .iter()
        .find(|(_, owner)| **owner == id)
        .map(|(site, _)| *site)
        .or_else(|| turn.state.plan.as_ref().map(PathPlan::destination))
        .unwrap_or(turn.agent.cell);

    debug!(agent = id.get(), site = %abandoned, remaining, "footsteps close by, aborting plant");
    turn.abandon(abandoned);

    if let Some((site, plan)) = turn.best_site(Some(abandoned)) {
        return turn.commit(site, plan);
    }

    let origin = turn.agent.cell;
    let fallback = turn
        .inputs
        .snapshot
        .board
        .neighbors(origin)
        .find(|cell| turn.can_enter(*cell));
    match fallback {
        Some(cell) => RuleOutcome::Handled(turn.act(ActionKind::Move, cell)),
        None => RuleOutcome::Handled(None),
    }
}

fn continue_site_path(turn: &mut Turn<'_>) -> RuleOutcome {
    let Some(site) = turn.state.plan.as_ref().map(PathPlan::destination) else {
        return RuleOutcome::NotApplicable;
    };

    let id = turn.agent.id;
    let snapshot = turn.inputs.snapshot;
    let valid = turn.inputs.sites.contains(&site)
        && snapshot.device_at(site).is_none()
        && turn.reservations.get(&site).map_or(true, |owner| *owner == id);
    if !valid {
        turn.state.plan = None;
        turn.release_reservation();
        return RuleOutcome::NotApplicable;
    }

    if turn.agent.cell.is_adjacent(site) {
        return RuleOutcome::Handled(turn.act(ActionKind::Plant, site));
    }

    let blocked = turn.blocked_cells();
    let origin = turn.agent.cell;
    let step = turn.state.plan.as_mut().and_then(|plan| {
        turn.pathfinder
            .follow(&snapshot.board, plan, origin, |cell| blocked.contains(&cell))
    });

    match step {
        Some(PlanStep::Next(cell)) => turn.step_into(cell),
        Some(PlanStep::Arrived | PlanStep::Deviated) => RuleOutcome::Handled(None),
        None => {
            turn.state.plan = None;
            turn.release_reservation();
            RuleOutcome::NotApplicable
        }
    }
}

fn choose_site(turn: &mut Turn<'_>) -> RuleOutcome {
    match turn.best_site(None) {
        Some((site, plan)) => {
            debug!(agent = turn.agent.id.get(), site = %site, "heading for bombsite");
            turn.commit(site, plan)
        }
        None => {
            turn.release_reservation();
            RuleOutcome::NotApplicable
        }
    }
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Defender decision chain.
//!
//! Each alive defender is evaluated once per tick against an ordered table of
//! rules. The first rule that handles the tick wins: an in-progress defuse is
//! left alone, visible devices that can still be defused in time come next,
//! then devices inferred from heard sounds, and finally the patrol route.
//! Device and site claims are shared across the team so two defenders never
//! chase the same target.

use std::collections::{BTreeMap, BTreeSet};

use bombsite_core::{
    Action, ActionKind, AgentId, AgentSnapshot, CellCoord, Constants, DeviceSnapshot,
    EngineConfig, RuleOutcome, SoundIntensity, Team, WorldSnapshot,
};
use bombsite_system_allocation::Assignment;
use bombsite_system_patrol::PatrolRoute;
use bombsite_world::{query, Arrival, PathPlan, Pathfinder, PlanStep, SignalMap};
use tracing::{debug, warn};

/// Read-only inputs shared by every defender evaluated in one tick.
#[derive(Clone, Copy, Debug)]
pub struct DefenseInputs<'a> {
    /// World state delivered by the host.
    pub snapshot: &'a WorldSnapshot,
    /// Match constants.
    pub constants: &'a Constants,
    /// Bot tuning.
    pub config: &'a EngineConfig,
    /// Sound lookup built from the surviving bombsites.
    pub signal_map: &'a SignalMap,
    /// Sites owned by each defender.
    pub assignment: &'a Assignment,
    /// Bombsites that still exist.
    pub sites: &'a [CellCoord],
}

/// Cross-tick state of the defending team.
#[derive(Debug, Default)]
pub struct Defense {
    agents: BTreeMap<AgentId, DefenderState>,
    claims: Claims,
    pathfinder: Pathfinder,
}

impl Defense {
    /// Creates a defense with no remembered plans.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every defender's patrol route.
    ///
    /// Patrol legs and sound investigations are dropped because site ownership
    /// may have changed; device chases survive.
    pub fn install_patrols<I>(&mut self, routes: I)
    where
        I: IntoIterator<Item = (AgentId, PatrolRoute)>,
    {
        for state in self.agents.values_mut() {
            state.patrol_route = PatrolRoute::default();
            state.patrol_plan = None;
            state.sound_plan = None;
        }
        self.claims.sites.clear();

        for (agent, route) in routes {
            self.agents.entry(agent).or_default().patrol_route = route;
        }
    }

    /// Patrol route installed for `agent`.
    #[must_use]
    pub fn patrol_route(&self, agent: AgentId) -> Option<&PatrolRoute> {
        self.agents.get(&agent).map(|state| &state.patrol_route)
    }

    /// Defender currently committed to the device on `cell`.
    #[must_use]
    pub fn device_claim(&self, cell: CellCoord) -> Option<AgentId> {
        self.claims.devices.get(&cell).copied()
    }

    /// Defender currently investigating `site`.
    #[must_use]
    pub fn site_claim(&self, site: CellCoord) -> Option<AgentId> {
        self.claims.sites.get(&site).copied()
    }

    /// Evaluates the rule chain for every alive defender in ascending id
    /// order and appends the chosen actions to `out`.
    pub fn handle(&mut self, inputs: &DefenseInputs<'_>, out: &mut Vec<Action>) {
        let defenders = inputs.snapshot.alive_agents(Team::Defender);
        self.prune(inputs, &defenders);

        for agent in defenders {
            let exclusions =
                query::walking_exclusions(inputs.snapshot, inputs.sites, Team::Defender, agent.id);
            let mut turn = Turn {
                inputs,
                agent,
                state: self.agents.entry(agent.id).or_default(),
                claims: &mut self.claims,
                pathfinder: &mut self.pathfinder,
                exclusions,
            };

            for (name, rule) in RULES {
                if let RuleOutcome::Handled(action) = rule(&mut turn) {
                    debug!(agent = agent.id.get(), rule = name, ?action, "defender rule fired");
                    out.extend(action);
                    break;
                }
            }
        }
    }

    fn prune(&mut self, inputs: &DefenseInputs<'_>, defenders: &[&AgentSnapshot]) {
        let alive: BTreeSet<AgentId> = defenders.iter().map(|agent| agent.id).collect();
        let snapshot = inputs.snapshot;

        self.agents.retain(|id, _| alive.contains(id));
        self.claims
            .devices
            .retain(|cell, owner| alive.contains(&*owner) && snapshot.device_at(*cell).is_some());
        self.claims
            .sites
            .retain(|site, owner| alive.contains(&*owner) && inputs.sites.contains(site));

        for state in self.agents.values_mut() {
            state
                .hopeless
                .retain(|cell| snapshot.device_at(*cell).is_some());
            if state
                .sound_plan
                .as_ref()
                .is_some_and(|plan| !inputs.sites.contains(&plan.destination()))
            {
                state.sound_plan = None;
            }
        }
    }
}

#[derive(Debug, Default)]
struct DefenderState {
    device_plan: Option<PathPlan>,
    sound_plan: Option<PathPlan>,
    patrol_plan: Option<PathPlan>,
    patrol_route: PatrolRoute,
    hopeless: BTreeSet<CellCoord>,
    investigated: BTreeMap<CellCoord, u32>,
}

impl DefenderState {
    fn plan_mut(&mut self, slot: Slot) -> &mut Option<PathPlan> {
        match slot {
            Slot::Device => &mut self.device_plan,
            Slot::Sound => &mut self.sound_plan,
            Slot::Patrol => &mut self.patrol_plan,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Device,
    Sound,
    Patrol,
}

#[derive(Debug, Default)]
struct Claims {
    devices: BTreeMap<CellCoord, AgentId>,
    sites: BTreeMap<CellCoord, AgentId>,
}

fn taken_by_other(
    ledger: &BTreeMap<CellCoord, AgentId>,
    cell: CellCoord,
    agent: AgentId,
) -> bool {
    ledger.get(&cell).is_some_and(|owner| *owner != agent)
}

fn release(ledger: &mut BTreeMap<CellCoord, AgentId>, cell: CellCoord, agent: AgentId) {
    if ledger.get(&cell) == Some(&agent) {
        let _ = ledger.remove(&cell);
    }
}

struct Turn<'a> {
    inputs: &'a DefenseInputs<'a>,
    agent: &'a AgentSnapshot,
    state: &'a mut DefenderState,
    claims: &'a mut Claims,
    pathfinder: &'a mut Pathfinder,
    exclusions: BTreeSet<CellCoord>,
}

impl Turn<'_> {
    fn act(&self, kind: ActionKind, target: CellCoord) -> Option<Action> {
        match Action::toward(self.agent.id, kind, self.agent.cell, target) {
            Ok(action) => Some(action),
            Err(error) => {
                warn!(agent = self.agent.id.get(), %error, "rejected defender action");
                None
            }
        }
    }

    fn step_into(&self, cell: CellCoord) -> RuleOutcome {
        let snapshot = self.inputs.snapshot;
        if query::is_enterable(&snapshot.board, snapshot, cell, self.agent.id) {
            RuleOutcome::Handled(self.act(ActionKind::Move, cell))
        } else {
            RuleOutcome::Handled(None)
        }
    }

    fn plan_path(&mut self, destination: CellCoord, arrival: Arrival) -> Option<PathPlan> {
        let exclusions = &self.exclusions;
        self.pathfinder.find_path(
            &self.inputs.snapshot.board,
            self.agent.cell,
            destination,
            arrival,
            |cell| exclusions.contains(&cell),
        )
    }

    fn follow(&mut self, slot: Slot) -> Option<PlanStep> {
        let exclusions = &self.exclusions;
        let stored = self.state.plan_mut(slot);
        let plan = stored.as_mut()?;
        let step = self.pathfinder.follow(
            &self.inputs.snapshot.board,
            plan,
            self.agent.cell,
            |cell| exclusions.contains(&cell),
        );
        if step.is_none() {
            *stored = None;
        }
        step
    }

    fn drop_device_plan(&mut self) {
        if let Some(plan) = self.state.device_plan.take() {
            release(&mut self.claims.devices, plan.destination(), self.agent.id);
        }
    }

    fn drop_sound_plan(&mut self) {
        if let Some(plan) = self.state.sound_plan.take() {
            release(&mut self.claims.sites, plan.destination(), self.agent.id);
        }
    }

    fn mark_investigated(&mut self, site: CellCoord) {
        let _ = self
            .state
            .investigated
            .insert(site, self.inputs.snapshot.tick);
        self.drop_sound_plan();
    }

    fn recently_investigated(&self, site: CellCoord) -> bool {
        let tick = self.inputs.snapshot.tick;
        self.state
            .investigated
            .get(&site)
            .is_some_and(|at| tick.saturating_sub(*at) < self.inputs.config.reinvestigate_cooldown)
    }
}

type DefenderRule = fn(&mut Turn<'_>) -> RuleOutcome;

const RULES: [(&str, DefenderRule); 7] = [
    ("operation_in_progress", operation_in_progress),
    ("continue_device_chase", continue_device_chase),
    ("engage_visible_device", engage_visible_device),
    ("continue_sound_chase", continue_sound_chase),
    ("follow_heard_sound", follow_heard_sound),
    ("continue_patrol_leg", continue_patrol_leg),
    ("start_patrol_leg", start_patrol_leg),
];

fn operation_in_progress(turn: &mut Turn<'_>) -> RuleOutcome {
    if turn.agent.is_operating() {
        RuleOutcome::Handled(None)
    } else {
        RuleOutcome::NotApplicable
    }
}

fn continue_device_chase(turn: &mut Turn<'_>) -> RuleOutcome {
    let Some(target) = turn.state.device_plan.as_ref().map(PathPlan::destination) else {
        return RuleOutcome::NotApplicable;
    };

    let id = turn.agent.id;
    let available = turn
        .inputs
        .snapshot
        .device_at(target)
        .is_some_and(|device| device.defuser.map_or(true, |defuser| defuser == id))
        && !taken_by_other(&turn.claims.devices, target, id);
    if !available {
        turn.drop_device_plan();
        return RuleOutcome::NotApplicable;
    }

    if turn.agent.cell.is_adjacent(target) {
        return RuleOutcome::Handled(turn.act(ActionKind::Defuse, target));
    }

    match turn.follow(Slot::Device) {
        Some(PlanStep::Next(cell)) => turn.step_into(cell),
        Some(PlanStep::Arrived | PlanStep::Deviated) => RuleOutcome::Handled(None),
        None => {
            release(&mut turn.claims.devices, target, id);
            RuleOutcome::NotApplicable
        }
    }
}

fn engage_visible_device(turn: &mut Turn<'_>) -> RuleOutcome {
    let inputs = turn.inputs;
    let id = turn.agent.id;
    let origin = turn.agent.cell;
    let vision = inputs.constants.defender_vision;

    let mut candidates: Vec<&DeviceSnapshot> = inputs
        .snapshot
        .devices
        .iter()
        .filter(|device| device.cell.manhattan_distance(origin) <= vision)
        .filter(|device| device.defuser.map_or(true, |defuser| defuser == id))
        .filter(|device| !taken_by_other(&turn.claims.devices, device.cell, id))
        .filter(|device| !turn.state.hopeless.contains(&device.cell))
        .collect();
    candidates.sort_by_key(|device| (device.cell.manhattan_distance(origin), device.cell));

    for device in candidates {
        let Some(mut plan) = turn.plan_path(device.cell, Arrival::Adjacent) else {
            continue;
        };

        let moves = u32::try_from(plan.len()).unwrap_or(u32::MAX);
        if moves.saturating_add(inputs.constants.defuse_duration) > device.explosion_remaining {
            debug!(
                agent = id.get(),
                device = %device.cell,
                moves,
                fuse = device.explosion_remaining,
                "device cannot be defused in time"
            );
            let _ = turn.state.hopeless.insert(device.cell);
            continue;
        }

        turn.drop_sound_plan();
        turn.state.patrol_plan = None;
        let _ = turn.claims.devices.insert(device.cell, id);

        let step = plan.advance(origin);
        turn.state.device_plan = Some(plan);
        return match step {
            PlanStep::Next(cell) => turn.step_into(cell),
            PlanStep::Arrived | PlanStep::Deviated => {
                RuleOutcome::Handled(turn.act(ActionKind::Defuse, device.cell))
            }
        };
    }

    RuleOutcome::NotApplicable
}

fn continue_sound_chase(turn: &mut Turn<'_>) -> RuleOutcome {
    let Some(site) = turn.state.sound_plan.as_ref().map(PathPlan::destination) else {
        return RuleOutcome::NotApplicable;
    };

    if taken_by_other(&turn.claims.sites, site, turn.agent.id) {
        turn.drop_sound_plan();
        return RuleOutcome::NotApplicable;
    }

    if turn.agent.cell.is_adjacent(site) {
        turn.mark_investigated(site);
        return RuleOutcome::NotApplicable;
    }

    match turn.follow(Slot::Sound) {
        Some(PlanStep::Next(cell)) => turn.step_into(cell),
        Some(PlanStep::Arrived) => {
            turn.mark_investigated(site);
            RuleOutcome::NotApplicable
        }
        Some(PlanStep::Deviated) => RuleOutcome::Handled(None),
        None => {
            release(&mut turn.claims.sites, site, turn.agent.id);
            RuleOutcome::NotApplicable
        }
    }
}

fn follow_heard_sound(turn: &mut Turn<'_>) -> RuleOutcome {
    let inputs = turn.inputs;
    let id = turn.agent.id;
    let origin = turn.agent.cell;
    let owned = inputs.assignment.sites_for(id);

    for intensity in SoundIntensity::ALL {
        if !turn.agent.heard.devices.contains(&intensity) {
            continue;
        }
        let Some(site) = inputs.signal_map.source_for(origin, intensity) else {
            continue;
        };
        if !owned.contains(&site)
            || !inputs.sites.contains(&site)
            || taken_by_other(&turn.claims.sites, site, id)
            || turn.recently_investigated(site)
        {
            continue;
        }
        if origin.is_adjacent(site) {
            turn.mark_investigated(site);
            continue;
        }

        let Some(mut plan) = turn.plan_path(site, Arrival::Adjacent) else {
            continue;
        };

        debug!(agent = id.get(), site = %site, ?intensity, "investigating heard device");
        let _ = turn.claims.sites.insert(site, id);
        turn.state.patrol_plan = None;
        let step = plan.advance(origin);
        turn.state.sound_plan = Some(plan);
        return match step {
            PlanStep::Next(cell) => turn.step_into(cell),
            PlanStep::Arrived | PlanStep::Deviated => RuleOutcome::Handled(None),
        };
    }

    RuleOutcome::NotApplicable
}

fn continue_patrol_leg(turn: &mut Turn<'_>) -> RuleOutcome {
    if turn.state.patrol_plan.is_none() {
        return RuleOutcome::NotApplicable;
    }

    match turn.follow(Slot::Patrol) {
        Some(PlanStep::Next(cell)) => turn.step_into(cell),
        Some(PlanStep::Arrived) => {
            turn.state.patrol_plan = None;
            RuleOutcome::NotApplicable
        }
        Some(PlanStep::Deviated) => RuleOutcome::Handled(None),
        None => RuleOutcome::NotApplicable,
    }
}

fn start_patrol_leg(turn: &mut Turn<'_>) -> RuleOutcome {
    let origin = turn.agent.cell;
    let route = &mut turn.state.patrol_route;
    let Some(mut target) = route.current() else {
        return RuleOutcome::NotApplicable;
    };
    if target == origin {
        let Some(next) = route.advance() else {
            return RuleOutcome::NotApplicable;
        };
        target = next;
    }
    if target == origin {
        return RuleOutcome::Handled(None);
    }

    let Some(mut plan) = turn.plan_path(target, Arrival::OnCell) else {
        let _ = turn.state.patrol_route.advance();
        return RuleOutcome::NotApplicable;
    };

    let step = plan.advance(origin);
    turn.state.patrol_plan = Some(plan);
    match step {
        PlanStep::Next(cell) => turn.step_into(cell),
        PlanStep::Arrived | PlanStep::Deviated => RuleOutcome::Handled(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bombsite_core::{AgentStatus, Board, Direction, HeardSounds, SiteScores, SoundRanges};
    use bombsite_system_allocation::partition;

    fn constants() -> Constants {
        Constants {
            defender_vision: 3,
            attacker_vision: 3,
            defuse_duration: 3,
            plant_duration: 3,
            sound_ranges: SoundRanges {
                strong: 1,
                normal: 2,
                weak: 3,
            },
            site_scores: SiteScores::default(),
        }
    }

    fn defender(id: u32, row: u32, column: u32) -> AgentSnapshot {
        AgentSnapshot {
            id: AgentId::new(id),
            team: Team::Defender,
            cell: CellCoord::new(row, column),
            status: AgentStatus::Alive,
            operation_remaining: None,
            heard: HeardSounds::default(),
        }
    }

    fn device(row: u32, column: u32, fuse: u32) -> DeviceSnapshot {
        DeviceSnapshot {
            cell: CellCoord::new(row, column),
            explosion_remaining: fuse,
            defuser: None,
            planter: None,
        }
    }

    struct Fixture {
        snapshot: WorldSnapshot,
        constants: Constants,
        config: EngineConfig,
        signal_map: SignalMap,
        assignment: Assignment,
        sites: Vec<CellCoord>,
    }

    impl Fixture {
        fn new(rows: &[&str], agents: Vec<AgentSnapshot>, devices: Vec<DeviceSnapshot>) -> Self {
            let board = Board::from_rows(rows).expect("valid board");
            let sites = board.bombsites();
            let constants = constants();
            let signal_map = SignalMap::build(&board, &sites, constants.sound_ranges);
            let owners: Vec<(AgentId, CellCoord)> =
                agents.iter().map(|agent| (agent.id, agent.cell)).collect();
            let assignment = partition(&sites, &owners);
            Self {
                snapshot: WorldSnapshot {
                    tick: 0,
                    board,
                    agents,
                    devices,
                },
                constants,
                config: EngineConfig::default(),
                signal_map,
                assignment,
                sites,
            }
        }

        fn run(&self, defense: &mut Defense) -> Vec<Action> {
            let inputs = DefenseInputs {
                snapshot: &self.snapshot,
                constants: &self.constants,
                config: &self.config,
                signal_map: &self.signal_map,
                assignment: &self.assignment,
                sites: &self.sites,
            };
            let mut out = Vec::new();
            defense.handle(&inputs, &mut out);
            out
        }
    }

    #[test]
    fn busy_defender_does_nothing() {
        let mut busy = defender(1, 0, 1);
        busy.operation_remaining = Some(2);
        let fixture = Fixture::new(&["s.."], vec![busy], vec![device(0, 0, 9)]);
        let mut defense = Defense::new();

        assert!(fixture.run(&mut defense).is_empty());
    }

    #[test]
    fn adjacent_device_is_defused_immediately() {
        let fixture = Fixture::new(&["s.."], vec![defender(1, 0, 1)], vec![device(0, 0, 9)]);
        let mut defense = Defense::new();

        let actions = fixture.run(&mut defense);
        assert_eq!(
            actions,
            vec![Action {
                agent: AgentId::new(1),
                kind: ActionKind::Defuse,
                direction: Direction::West,
            }]
        );
        assert_eq!(
            defense.device_claim(CellCoord::new(0, 0)),
            Some(AgentId::new(1))
        );
    }

    #[test]
    fn hopeless_device_is_skipped() {
        // Two moves plus three defuse ticks exceed a four tick fuse.
        let fixture = Fixture::new(&["s..."], vec![defender(1, 0, 3)], vec![device(0, 0, 4)]);
        let mut defense = Defense::new();

        assert!(fixture.run(&mut defense).is_empty());
        assert_eq!(defense.device_claim(CellCoord::new(0, 0)), None);
    }

    #[test]
    fn claimed_device_is_left_to_its_owner() {
        let fixture = Fixture::new(
            &["...s..."],
            vec![defender(1, 0, 1), defender(2, 0, 6)],
            vec![device(0, 3, 20)],
        );
        let mut defense = Defense::new();

        let actions = fixture.run(&mut defense);
        assert_eq!(defense.device_claim(CellCoord::new(0, 3)), Some(AgentId::new(1)));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].agent, AgentId::new(1));
        assert_eq!(actions[0].direction, Direction::East);
    }

    #[test]
    fn device_being_defused_by_teammate_is_ignored() {
        let mut held = device(0, 0, 20);
        held.defuser = Some(AgentId::new(7));
        let fixture = Fixture::new(&["s..."], vec![defender(1, 0, 3)], vec![held]);
        let mut defense = Defense::new();

        assert!(fixture.run(&mut defense).is_empty());
    }

    #[test]
    fn heard_sound_leads_to_owned_site() {
        let mut listener = defender(1, 0, 3);
        listener.heard.devices = vec![SoundIntensity::Weak];
        let fixture = Fixture::new(&["s......"], vec![listener], Vec::new());
        let mut defense = Defense::new();

        let actions = fixture.run(&mut defense);
        assert_eq!(defense.site_claim(CellCoord::new(0, 0)), Some(AgentId::new(1)));
        assert_eq!(
            actions,
            vec![Action {
                agent: AgentId::new(1),
                kind: ActionKind::Move,
                direction: Direction::West,
            }]
        );
    }

    #[test]
    fn ambiguous_sound_is_ignored() {
        let mut listener = defender(1, 0, 2);
        listener.heard.devices = vec![SoundIntensity::Normal];
        let fixture = Fixture::new(&["s...s"], vec![listener], Vec::new());
        let mut defense = Defense::new();

        assert!(fixture.run(&mut defense).is_empty());
        assert_eq!(defense.site_claim(CellCoord::new(0, 0)), None);
        assert_eq!(defense.site_claim(CellCoord::new(0, 4)), None);
    }

    #[test]
    fn patrol_walks_toward_the_current_route_cell() {
        let fixture = Fixture::new(&["s....."], vec![defender(1, 0, 5)], Vec::new());
        let mut defense = Defense::new();
        defense.install_patrols([(
            AgentId::new(1),
            PatrolRoute::new(vec![CellCoord::new(0, 1), CellCoord::new(0, 3)]),
        )]);

        let actions = fixture.run(&mut defense);
        assert_eq!(
            actions,
            vec![Action {
                agent: AgentId::new(1),
                kind: ActionKind::Move,
                direction: Direction::West,
            }]
        );
    }

    #[test]
    fn single_cell_post_is_held() {
        let fixture = Fixture::new(&["s.."], vec![defender(1, 0, 1)], Vec::new());
        let mut defense = Defense::new();
        defense.install_patrols([(AgentId::new(1), PatrolRoute::new(vec![CellCoord::new(0, 1)]))]);

        assert!(fixture.run(&mut defense).is_empty());
        assert!(fixture.run(&mut defense).is_empty());
    }

    #[test]
    fn dead_defenders_lose_their_state() {
        let mut fixture = Fixture::new(&["s.."], vec![defender(1, 0, 1)], vec![device(0, 0, 9)]);
        let mut defense = Defense::new();
        let _ = fixture.run(&mut defense);
        assert!(defense.device_claim(CellCoord::new(0, 0)).is_some());

        fixture.snapshot.agents[0].status = AgentStatus::Dead;
        assert!(fixture.run(&mut defense).is_empty());
        assert_eq!(defense.device_claim(CellCoord::new(0, 0)), None);
        assert!(defense.patrol_route(AgentId::new(1)).is_none());
    }
}

//! Breadth-first grid navigation with per-query exclusions.

use std::collections::VecDeque;

use bombsite_core::{Board, CellCoord};

const NO_PARENT: u32 = u32::MAX;
const UNREACHABLE: u32 = u32::MAX;

/// Where a path should end relative to its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arrival {
    /// Stop on a cell adjacent to the destination so the agent can act on it.
    Adjacent,
    /// Stop on the destination itself.
    OnCell,
}

/// Outcome of consuming one waypoint from a [`PathPlan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanStep {
    /// The agent should move into the returned cell this tick.
    Next(CellCoord),
    /// Every waypoint was consumed; the agent is in position.
    Arrived,
    /// The agent is not where the plan expected it, so the plan is stale.
    Deviated,
}

/// Agent-owned queue of waypoints produced by the [`Pathfinder`].
///
/// The source cell is never part of the queue. An empty queue means the agent
/// already stands where the plan wanted it to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPlan {
    destination: CellCoord,
    arrival: Arrival,
    waypoints: VecDeque<CellCoord>,
    expected: CellCoord,
}

impl PathPlan {
    fn new(
        source: CellCoord,
        destination: CellCoord,
        arrival: Arrival,
        waypoints: VecDeque<CellCoord>,
    ) -> Self {
        Self {
            destination,
            arrival,
            waypoints,
            expected: source,
        }
    }

    /// Where the plan stops relative to its destination.
    #[must_use]
    pub fn arrival(&self) -> Arrival {
        self.arrival
    }

    /// Reports whether an agent on `cell` is in position for this plan.
    #[must_use]
    pub fn is_in_position(&self, cell: CellCoord) -> bool {
        match self.arrival {
            Arrival::Adjacent => cell.is_adjacent(self.destination),
            Arrival::OnCell => cell == self.destination,
        }
    }

    /// Cell the plan leads to (or next to, for [`Arrival::Adjacent`]).
    #[must_use]
    pub fn destination(&self) -> CellCoord {
        self.destination
    }

    /// Number of moves left in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Reports whether no moves are left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Remaining waypoints in walking order.
    pub fn waypoints(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.waypoints.iter().copied()
    }

    /// Consumes the next waypoint for an agent currently standing on `current`.
    pub fn advance(&mut self, current: CellCoord) -> PlanStep {
        if current != self.expected {
            return PlanStep::Deviated;
        }

        match self.waypoints.pop_front() {
            Some(next) => {
                self.expected = next;
                PlanStep::Next(next)
            }
            None => PlanStep::Arrived,
        }
    }
}

/// Dense hop-distance grid seeded from a single source.
///
/// Distances default to `u32::MAX` for unreachable cells so callers can
/// distinguish walls and excluded cells from traversable tiles.
#[derive(Clone, Debug, Default)]
pub struct DistanceField {
    columns: u32,
    rows: u32,
    distances: Vec<u32>,
}

impl DistanceField {
    /// Hop distance to `cell`, or `None` when unreachable or out of bounds.
    #[must_use]
    pub fn distance(&self, cell: CellCoord) -> Option<u32> {
        if cell.column() >= self.columns || cell.row() >= self.rows {
            return None;
        }

        let width = usize::try_from(self.columns).ok()?;
        index(width, cell)
            .and_then(|offset| self.distances.get(offset).copied())
            .filter(|distance| *distance != UNREACHABLE)
    }

    /// Hops needed to stand next to `cell`, the smallest distance among its neighbours.
    #[must_use]
    pub fn adjacent_distance(&self, cell: CellCoord) -> Option<u32> {
        neighbors(cell, self.columns, self.rows)
            .filter_map(|neighbor| self.distance(neighbor))
            .min()
    }

    /// Reports whether the cell was reached by the flood.
    #[must_use]
    pub fn is_reachable(&self, cell: CellCoord) -> bool {
        self.distance(cell).is_some()
    }
}

/// Shortest-path search over the four-connected board.
///
/// Walls and out-of-bounds cells are always impassable. Callers add their own
/// exclusions (occupied cells, bombsites) through a predicate; the destination
/// of a query is exempt from that predicate. Neighbours are expanded in
/// [`bombsite_core::Direction::ALL`] order so equal-length alternatives always
/// resolve the same way. Scratch buffers are reused across queries.
#[derive(Debug, Default)]
pub struct Pathfinder {
    parents: Vec<u32>,
    frontier: VecDeque<CellCoord>,
}

impl Pathfinder {
    /// Creates a pathfinder with empty scratch buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the shortest plan from `source` toward `destination`.
    ///
    /// Returns `None` when no path exists. With [`Arrival::Adjacent`] the plan
    /// holds the cells strictly between source and destination, so it is empty
    /// when the two are one step apart; `source == destination` is unreachable
    /// in that mode. With [`Arrival::OnCell`] the destination is the last
    /// waypoint.
    pub fn find_path<F>(
        &mut self,
        board: &Board,
        source: CellCoord,
        destination: CellCoord,
        arrival: Arrival,
        is_excluded: F,
    ) -> Option<PathPlan>
    where
        F: Fn(CellCoord) -> bool,
    {
        if !board.contains(source) || !board.contains(destination) {
            return None;
        }

        if source == destination {
            return match arrival {
                Arrival::Adjacent => None,
                Arrival::OnCell => Some(PathPlan::new(
                    source,
                    destination,
                    arrival,
                    VecDeque::new(),
                )),
            };
        }

        if arrival == Arrival::OnCell && board.is_wall(destination) {
            return None;
        }

        if arrival == Arrival::Adjacent && source.is_adjacent(destination) {
            return Some(PathPlan::new(source, destination, arrival, VecDeque::new()));
        }

        let passable = |cell: CellCoord| {
            cell == destination || (!board.is_wall(cell) && !is_excluded(cell))
        };

        let width = usize::try_from(board.columns()).ok()?;
        self.parents.clear();
        self.parents.resize(board.len(), NO_PARENT);
        self.frontier.clear();

        let source_index = index(width, source)?;
        self.parents[source_index] = u32::try_from(source_index).ok()?;
        self.frontier.push_back(source);

        let mut found = false;
        while let Some(cell) = self.frontier.pop_front() {
            if cell == destination {
                found = true;
                break;
            }

            let Some(cell_index) = index(width, cell).and_then(|i| u32::try_from(i).ok()) else {
                continue;
            };

            for neighbor in neighbors(cell, board.columns(), board.rows()) {
                if !passable(neighbor) {
                    continue;
                }

                let Some(neighbor_index) = index(width, neighbor) else {
                    continue;
                };

                if self.parents[neighbor_index] != NO_PARENT {
                    continue;
                }

                self.parents[neighbor_index] = cell_index;
                self.frontier.push_back(neighbor);
            }
        }

        if !found {
            return None;
        }

        let mut waypoints = VecDeque::new();
        let mut cursor = destination;
        while cursor != source {
            waypoints.push_front(cursor);
            let parent = self.parents[index(width, cursor)?];
            cursor = board.cell_at(usize::try_from(parent).ok()?)?;
        }

        if arrival == Arrival::Adjacent {
            let _ = waypoints.pop_back();
        }

        Some(PathPlan::new(source, destination, arrival, waypoints))
    }

    /// Consumes the next step of `plan` for an agent standing on `current`.
    ///
    /// A plan the agent strayed from, or one that ran out before the agent
    /// got into position, is recomputed toward the same destination. Returns
    /// `None` when the destination is no longer reachable; the plan is then
    /// left untouched and the caller should drop it.
    pub fn follow<F>(
        &mut self,
        board: &Board,
        plan: &mut PathPlan,
        current: CellCoord,
        is_excluded: F,
    ) -> Option<PlanStep>
    where
        F: Fn(CellCoord) -> bool,
    {
        match plan.advance(current) {
            PlanStep::Next(cell) => return Some(PlanStep::Next(cell)),
            PlanStep::Arrived if plan.is_in_position(current) => return Some(PlanStep::Arrived),
            PlanStep::Arrived | PlanStep::Deviated => {}
        }

        let mut fresh = self.find_path(
            board,
            current,
            plan.destination(),
            plan.arrival(),
            is_excluded,
        )?;
        let step = fresh.advance(current);
        *plan = fresh;
        Some(step)
    }

    /// Floods the board from `source`, recording the hop distance of every reachable cell.
    ///
    /// The source is always reachable at distance zero, even when excluded.
    pub fn flood<F>(&mut self, board: &Board, source: CellCoord, is_excluded: F) -> DistanceField
    where
        F: Fn(CellCoord) -> bool,
    {
        let mut field = DistanceField {
            columns: board.columns(),
            rows: board.rows(),
            distances: vec![UNREACHABLE; board.len()],
        };

        let Ok(width) = usize::try_from(board.columns()) else {
            return field;
        };
        let Some(source_index) = index(width, source).filter(|_| board.contains(source)) else {
            return field;
        };

        self.frontier.clear();
        field.distances[source_index] = 0;
        self.frontier.push_back(source);

        while let Some(cell) = self.frontier.pop_front() {
            let Some(current_index) = index(width, cell) else {
                continue;
            };
            let next_distance = field.distances[current_index].saturating_add(1);

            for neighbor in neighbors(cell, board.columns(), board.rows()) {
                if board.is_wall(neighbor) || is_excluded(neighbor) {
                    continue;
                }

                let Some(neighbor_index) = index(width, neighbor) else {
                    continue;
                };

                if field.distances[neighbor_index] <= next_distance {
                    continue;
                }

                field.distances[neighbor_index] = next_distance;
                self.frontier.push_back(neighbor);
            }
        }

        field
    }
}

pub(crate) fn neighbors(
    cell: CellCoord,
    columns: u32,
    rows: u32,
) -> impl Iterator<Item = CellCoord> {
    let mut candidates = [None; 4];
    let mut count = 0;

    if let Some(row) = cell.row().checked_sub(1) {
        candidates[count] = Some(CellCoord::new(row, cell.column()));
        count += 1;
    }

    if let Some(column) = cell.column().checked_add(1) {
        if column < columns {
            candidates[count] = Some(CellCoord::new(cell.row(), column));
            count += 1;
        }
    }

    if let Some(row) = cell.row().checked_add(1) {
        if row < rows {
            candidates[count] = Some(CellCoord::new(row, cell.column()));
            count += 1;
        }
    }

    if let Some(column) = cell.column().checked_sub(1) {
        candidates[count] = Some(CellCoord::new(cell.row(), column));
        count += 1;
    }

    candidates.into_iter().take(count).flatten()
}

pub(crate) fn index(width: usize, cell: CellCoord) -> Option<usize> {
    let column = usize::try_from(cell.column()).ok()?;
    let row = usize::try_from(cell.row()).ok()?;
    row.checked_mul(width)?.checked_add(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_board(rows: usize, columns: usize) -> Board {
        let row = ".".repeat(columns);
        Board::from_rows(&vec![row; rows]).expect("valid board")
    }

    #[test]
    fn adjacent_cells_yield_empty_plan() {
        let board = open_board(3, 3);
        let mut pathfinder = Pathfinder::new();
        let plan = pathfinder
            .find_path(
                &board,
                CellCoord::new(1, 1),
                CellCoord::new(1, 2),
                Arrival::Adjacent,
                |_| false,
            )
            .expect("adjacent is reachable");
        assert!(plan.is_empty());
    }

    #[test]
    fn same_cell_depends_on_arrival() {
        let board = open_board(3, 3);
        let mut pathfinder = Pathfinder::new();
        let cell = CellCoord::new(1, 1);
        assert!(pathfinder
            .find_path(&board, cell, cell, Arrival::Adjacent, |_| false)
            .is_none());
        let plan = pathfinder
            .find_path(&board, cell, cell, Arrival::OnCell, |_| false)
            .expect("standing on destination");
        assert!(plan.is_empty());
    }

    #[test]
    fn on_cell_keeps_destination_and_adjacent_drops_it() {
        let board = open_board(1, 5);
        let mut pathfinder = Pathfinder::new();
        let source = CellCoord::new(0, 0);
        let destination = CellCoord::new(0, 4);

        let on_cell = pathfinder
            .find_path(&board, source, destination, Arrival::OnCell, |_| false)
            .expect("reachable");
        assert_eq!(
            on_cell.waypoints().collect::<Vec<_>>(),
            vec![
                CellCoord::new(0, 1),
                CellCoord::new(0, 2),
                CellCoord::new(0, 3),
                CellCoord::new(0, 4),
            ]
        );

        let adjacent = pathfinder
            .find_path(&board, source, destination, Arrival::Adjacent, |_| false)
            .expect("reachable");
        assert_eq!(
            adjacent.waypoints().collect::<Vec<_>>(),
            vec![
                CellCoord::new(0, 1),
                CellCoord::new(0, 2),
                CellCoord::new(0, 3)
            ]
        );
    }

    #[test]
    fn walls_and_exclusions_block_but_destination_stays_open() {
        let board = Board::from_rows(&["...", "##.", "..."]).expect("valid board");
        let mut pathfinder = Pathfinder::new();
        let source = CellCoord::new(0, 0);
        let destination = CellCoord::new(2, 0);

        let plan = pathfinder
            .find_path(&board, source, destination, Arrival::OnCell, |_| false)
            .expect("route around the wall");
        assert_eq!(plan.len(), 6);

        let gap = CellCoord::new(1, 2);
        assert!(pathfinder
            .find_path(&board, source, destination, Arrival::OnCell, |cell| cell == gap)
            .is_none());

        let excluded_destination = pathfinder
            .find_path(&board, source, destination, Arrival::OnCell, |cell| {
                cell == destination
            })
            .expect("destination is always passable");
        assert_eq!(excluded_destination.len(), 6);
    }

    #[test]
    fn ties_resolve_in_direction_order() {
        let board = open_board(3, 3);
        let mut pathfinder = Pathfinder::new();
        let plan = pathfinder
            .find_path(
                &board,
                CellCoord::new(2, 0),
                CellCoord::new(0, 2),
                Arrival::OnCell,
                |_| false,
            )
            .expect("reachable");
        assert_eq!(
            plan.waypoints().collect::<Vec<_>>(),
            vec![
                CellCoord::new(1, 0),
                CellCoord::new(0, 0),
                CellCoord::new(0, 1),
                CellCoord::new(0, 2),
            ]
        );
    }

    #[test]
    fn plan_advance_detects_deviation() {
        let board = open_board(1, 4);
        let mut pathfinder = Pathfinder::new();
        let source = CellCoord::new(0, 0);
        let mut plan = pathfinder
            .find_path(&board, source, CellCoord::new(0, 3), Arrival::Adjacent, |_| {
                false
            })
            .expect("reachable");

        assert_eq!(plan.advance(source), PlanStep::Next(CellCoord::new(0, 1)));
        assert_eq!(plan.advance(source), PlanStep::Deviated);
        assert_eq!(
            plan.advance(CellCoord::new(0, 1)),
            PlanStep::Next(CellCoord::new(0, 2))
        );
        assert_eq!(plan.advance(CellCoord::new(0, 2)), PlanStep::Arrived);
    }

    #[test]
    fn follow_replans_after_deviation() {
        let board = open_board(3, 4);
        let mut pathfinder = Pathfinder::new();
        let source = CellCoord::new(0, 0);
        let destination = CellCoord::new(0, 3);
        let mut plan = pathfinder
            .find_path(&board, source, destination, Arrival::OnCell, |_| false)
            .expect("reachable");

        assert_eq!(
            pathfinder.follow(&board, &mut plan, source, |_| false),
            Some(PlanStep::Next(CellCoord::new(0, 1)))
        );

        // The agent was pushed south instead of stepping east.
        let pushed = CellCoord::new(1, 0);
        assert_eq!(
            pathfinder.follow(&board, &mut plan, pushed, |_| false),
            Some(PlanStep::Next(CellCoord::new(0, 0)))
        );
        assert_eq!(plan.len(), 3);

        let sealed = |cell: CellCoord| cell.column() == 2;
        assert_eq!(pathfinder.follow(&board, &mut plan, pushed, sealed), None);
    }

    #[test]
    fn follow_reports_arrival_only_in_position() {
        let board = open_board(1, 3);
        let mut pathfinder = Pathfinder::new();
        let source = CellCoord::new(0, 0);
        let destination = CellCoord::new(0, 2);
        let mut plan = pathfinder
            .find_path(&board, source, destination, Arrival::Adjacent, |_| false)
            .expect("reachable");

        assert_eq!(
            pathfinder.follow(&board, &mut plan, source, |_| false),
            Some(PlanStep::Next(CellCoord::new(0, 1)))
        );
        assert_eq!(
            pathfinder.follow(&board, &mut plan, CellCoord::new(0, 1), |_| false),
            Some(PlanStep::Arrived)
        );
        assert!(plan.is_in_position(CellCoord::new(0, 1)));
    }

    #[test]
    fn flood_records_hop_distances() {
        let board = Board::from_rows(&["...", ".#.", "..."]).expect("valid board");
        let mut pathfinder = Pathfinder::new();
        let field = pathfinder.flood(&board, CellCoord::new(0, 0), |_| false);

        assert_eq!(field.distance(CellCoord::new(0, 0)), Some(0));
        assert_eq!(field.distance(CellCoord::new(1, 1)), None);
        assert_eq!(field.distance(CellCoord::new(2, 2)), Some(4));
        assert_eq!(field.adjacent_distance(CellCoord::new(1, 1)), Some(1));
    }

    fn reference_distance(
        board: &Board,
        source: CellCoord,
        destination: CellCoord,
        blocked: &[bool],
    ) -> Option<u32> {
        let mut distances = vec![u32::MAX; board.len()];
        let mut queue = VecDeque::new();
        distances[board.index(source)?] = 0;
        queue.push_back(source);
        while let Some(cell) = queue.pop_front() {
            let current = distances[board.index(cell)?];
            if cell == destination {
                return Some(current);
            }
            for neighbor in board.neighbors(cell) {
                let slot = board.index(neighbor)?;
                let open = neighbor == destination || (!board.is_wall(neighbor) && !blocked[slot]);
                if open && distances[slot] == u32::MAX {
                    distances[slot] = current + 1;
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    fn arb_grid() -> impl Strategy<Value = (usize, usize, Vec<bool>, Vec<bool>)> {
        (2usize..8, 2usize..8).prop_flat_map(|(rows, columns)| {
            let cells = rows * columns;
            (
                Just(rows),
                Just(columns),
                proptest::collection::vec(proptest::bool::weighted(0.25), cells),
                proptest::collection::vec(proptest::bool::weighted(0.1), cells),
            )
        })
    }

    proptest! {
        #[test]
        fn path_length_matches_breadth_first_distance(
            (rows, columns, walls, blocked) in arb_grid(),
            source_seed in 0usize..64,
            destination_seed in 0usize..64,
        ) {
            let cells = rows * columns;
            let symbols: Vec<String> = (0..rows)
                .map(|row| {
                    (0..columns)
                        .map(|column| if walls[row * columns + column] { '#' } else { '.' })
                        .collect()
                })
                .collect();
            let board = Board::from_rows(&symbols).expect("valid board");
            let source = board.cell_at(source_seed % cells).expect("in bounds");
            let destination = board.cell_at(destination_seed % cells).expect("in bounds");
            prop_assume!(source != destination);

            let is_blocked = |cell: CellCoord| board.index(cell).map_or(true, |i| blocked[i]);
            let expected = reference_distance(&board, source, destination, &blocked);

            let mut pathfinder = Pathfinder::new();
            let adjacent = pathfinder.find_path(&board, source, destination, Arrival::Adjacent, is_blocked);

            match expected {
                None => prop_assert!(adjacent.is_none()),
                Some(hops) => {
                    let plan = adjacent.expect("reference found a path");
                    prop_assert_eq!(plan.len() + 1, hops as usize);
                    prop_assert_eq!(plan.is_empty(), source.is_adjacent(destination));
                    let mut previous = source;
                    for waypoint in plan.waypoints() {
                        prop_assert!(previous.is_adjacent(waypoint));
                        prop_assert!(!board.is_wall(waypoint));
                        prop_assert!(!is_blocked(waypoint));
                        previous = waypoint;
                    }
                    prop_assert!(previous.is_adjacent(destination));
                }
            }
        }
    }
}

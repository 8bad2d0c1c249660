#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Patrol routes over the cells from which a defender's sites can be heard.

use std::collections::HashMap;

use bombsite_core::{Board, CellCoord};
use bombsite_world::{DistanceField, Pathfinder, SignalMap};
use tracing::debug;

/// Ordered coverage cells walked back and forth by a defender.
///
/// The cursor moves toward the last cell, then back toward the first one,
/// reversing only at the two ends. A single-cell route never moves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatrolRoute {
    cells: Vec<CellCoord>,
    cursor: usize,
    descending: bool,
}

impl PatrolRoute {
    /// Creates a route over `cells`, sorted and deduplicated.
    #[must_use]
    pub fn new(mut cells: Vec<CellCoord>) -> Self {
        cells.sort();
        cells.dedup();
        Self {
            cells,
            cursor: 0,
            descending: false,
        }
    }

    /// Cells of the route in patrol order.
    #[must_use]
    pub fn cells(&self) -> &[CellCoord] {
        &self.cells
    }

    /// Reports whether the route has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Index of the cell currently targeted.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Cell currently targeted, if the route has any.
    #[must_use]
    pub fn current(&self) -> Option<CellCoord> {
        self.cells.get(self.cursor).copied()
    }

    /// Moves the cursor one position and returns the new target.
    pub fn advance(&mut self) -> Option<CellCoord> {
        let last = self.cells.len().checked_sub(1)?;
        if last == 0 {
            return self.current();
        }

        if self.descending && self.cursor == 0 {
            self.descending = false;
        } else if !self.descending && self.cursor >= last {
            self.descending = true;
        }

        self.cursor = if self.descending {
            self.cursor.saturating_sub(1)
        } else {
            (self.cursor + 1).min(last)
        };
        self.current()
    }
}

/// Builds patrol routes, memoising distance floods between candidate cells.
#[derive(Debug, Default)]
pub struct PatrolPlanner {
    pathfinder: Pathfinder,
    floods: HashMap<CellCoord, DistanceField>,
}

impl PatrolPlanner {
    /// Creates a planner with empty caches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the route for a defender standing on `origin` that guards `sites`.
    ///
    /// Every site contributes the floor cells from which it is uniquely
    /// audible and that the defender can reach; a site without such cells
    /// falls back to its reachable floor neighbours. Each candidate of the
    /// first site is tried as a start, every later site picks its candidate
    /// nearest the previous pick, and the chain with the smallest total
    /// distance wins.
    pub fn plan(
        &mut self,
        board: &Board,
        signal_map: &SignalMap,
        sites: &[CellCoord],
        origin: CellCoord,
    ) -> PatrolRoute {
        self.floods.clear();
        let blocks_walking = |cell: CellCoord| board.site_variant(cell).is_some();
        let reach = self.pathfinder.flood(board, origin, blocks_walking);

        let candidates: Vec<Vec<CellCoord>> = sites
            .iter()
            .map(|site| {
                let audible: Vec<CellCoord> = signal_map
                    .coverage_cells(*site)
                    .into_iter()
                    .filter(|cell| board.is_floor(*cell) && reach.is_reachable(*cell))
                    .collect();
                if audible.is_empty() {
                    board
                        .neighbors(*site)
                        .filter(|cell| board.is_floor(*cell) && reach.is_reachable(*cell))
                        .collect()
                } else {
                    audible
                }
            })
            .filter(|cells: &Vec<CellCoord>| !cells.is_empty())
            .collect();

        let Some((first, rest)) = candidates.split_first() else {
            return PatrolRoute::default();
        };

        let mut best: Option<(u64, Vec<CellCoord>)> = None;
        for &start in first {
            let mut chain = vec![start];
            let mut total = 0u64;
            let mut previous = start;

            for options in rest {
                let field = self.flood_from(board, previous);
                let Some((distance, next)) = options
                    .iter()
                    .filter_map(|cell| field.distance(*cell).map(|distance| (distance, *cell)))
                    .min()
                else {
                    continue;
                };
                total += u64::from(distance);
                chain.push(next);
                previous = next;
            }

            let improves = best
                .as_ref()
                .map_or(true, |(best_total, _)| total < *best_total);
            if improves {
                best = Some((total, chain));
            }
        }

        let route = PatrolRoute::new(best.map(|(_, chain)| chain).unwrap_or_default());
        debug!(
            origin = %origin,
            sites = sites.len(),
            cells = route.cells().len(),
            "planned patrol route"
        );
        route
    }

    fn flood_from(&mut self, board: &Board, source: CellCoord) -> &DistanceField {
        let pathfinder = &mut self.pathfinder;
        self.floods.entry(source).or_insert_with(|| {
            pathfinder.flood(board, source, |cell| board.site_variant(cell).is_some())
        })
    }
}

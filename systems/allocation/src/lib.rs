#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Balanced partition of bombsites among the alive defenders.

use std::{cmp::Reverse, collections::BTreeMap};

use bombsite_core::{AgentId, Board, CellCoord};
use bombsite_world::Pathfinder;
use tracing::debug;

/// Mapping from each alive defender to the bombsites it guards.
///
/// Every reachable site belongs to exactly one defender and the number of
/// sites per defender differs by at most one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
    owners: BTreeMap<AgentId, Vec<CellCoord>>,
}

impl Assignment {
    /// Sites owned by `defender`, empty when it owns none or is unknown.
    #[must_use]
    pub fn sites_for(&self, defender: AgentId) -> &[CellCoord] {
        self.owners
            .get(&defender)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Defender that owns `site`, if any.
    #[must_use]
    pub fn owner_of(&self, site: CellCoord) -> Option<AgentId> {
        self.owners
            .iter()
            .find(|(_, sites)| sites.contains(&site))
            .map(|(owner, _)| *owner)
    }

    /// Iterator over `(defender, sites)` pairs in ascending defender order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &[CellCoord])> {
        self.owners
            .iter()
            .map(|(owner, sites)| (*owner, sites.as_slice()))
    }

    /// Total number of assigned sites.
    #[must_use]
    pub fn site_count(&self) -> usize {
        self.owners.values().map(Vec::len).sum()
    }
}

/// Allocator that reuses a pathfinder to test site reachability.
#[derive(Debug, Default)]
pub struct ObjectiveAllocator {
    pathfinder: Pathfinder,
}

impl ObjectiveAllocator {
    /// Creates a new allocator with empty scratch buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Partitions the reachable subset of `sites` among `defenders`.
    pub fn allocate(
        &mut self,
        board: &Board,
        sites: &[CellCoord],
        defenders: &[(AgentId, CellCoord)],
    ) -> Assignment {
        let reachable = self.reachable_sites(board, sites, defenders);
        let assignment = partition(&reachable, defenders);
        debug!(
            sites = sites.len(),
            reachable = reachable.len(),
            defenders = defenders.len(),
            "allocated bombsites"
        );
        assignment
    }

    /// Sites that at least one defender can walk next to.
    ///
    /// Bombsite cells are never walkable, so a site counts as reachable when
    /// one of its neighbours is.
    pub fn reachable_sites(
        &mut self,
        board: &Board,
        sites: &[CellCoord],
        defenders: &[(AgentId, CellCoord)],
    ) -> Vec<CellCoord> {
        let mut reachable = vec![false; sites.len()];

        for &(_, origin) in defenders {
            if reachable.iter().all(|flag| *flag) {
                break;
            }

            let field = self
                .pathfinder
                .flood(board, origin, |cell| board.site_variant(cell).is_some());
            for (flag, site) in reachable.iter_mut().zip(sites) {
                if !*flag {
                    *flag = origin.is_adjacent(*site) || field.adjacent_distance(*site).is_some();
                }
            }
        }

        sites
            .iter()
            .zip(reachable)
            .filter(|(_, flag)| *flag)
            .map(|(site, _)| *site)
            .collect()
    }
}

/// Splits `sites` into balanced, spatially compact clusters, one per defender.
///
/// Each cluster is seeded with the remaining site farthest from the centroid
/// of the remaining sites and grown with the remaining site closest to any
/// member. The finished cluster goes to the unserved defender nearest its
/// seed. Distances are Manhattan throughout.
#[must_use]
pub fn partition(sites: &[CellCoord], defenders: &[(AgentId, CellCoord)]) -> Assignment {
    let mut unserved: Vec<(AgentId, CellCoord)> = defenders.to_vec();
    unserved.sort_by_key(|(id, _)| *id);
    unserved.dedup_by_key(|(id, _)| *id);

    let mut owners: BTreeMap<AgentId, Vec<CellCoord>> =
        unserved.iter().map(|(id, _)| (*id, Vec::new())).collect();

    let mut remaining = sites.to_vec();
    remaining.sort();
    remaining.dedup();

    if unserved.is_empty() || remaining.is_empty() {
        return Assignment { owners };
    }

    let total = remaining.len();
    let defender_count = unserved.len();
    let base = total / defender_count;
    let extra = total % defender_count;

    for cluster_index in 0..defender_count {
        let quota = base + usize::from(cluster_index < extra);
        if quota == 0 {
            break;
        }

        let Some(seed) = take_extreme(&mut remaining) else {
            break;
        };
        let mut cluster = vec![seed];
        while cluster.len() < quota {
            let Some(next) = take_nearest(&mut remaining, &cluster) else {
                break;
            };
            cluster.push(next);
        }

        let Some(owner_index) = unserved
            .iter()
            .enumerate()
            .min_by_key(|(_, (id, cell))| (cell.manhattan_distance(seed), *id))
            .map(|(index, _)| index)
        else {
            break;
        };
        let (owner, _) = unserved.remove(owner_index);

        cluster.sort();
        let _ = owners.insert(owner, cluster);
    }

    Assignment { owners }
}

fn take_extreme(remaining: &mut Vec<CellCoord>) -> Option<CellCoord> {
    let count = i64::try_from(remaining.len()).ok()?;
    let row_sum: i64 = remaining.iter().map(|site| i64::from(site.row())).sum();
    let column_sum: i64 = remaining.iter().map(|site| i64::from(site.column())).sum();

    let index = remaining
        .iter()
        .enumerate()
        .max_by_key(|(_, site)| {
            let spread = (i64::from(site.row()) * count - row_sum).abs()
                + (i64::from(site.column()) * count - column_sum).abs();
            (spread, Reverse(**site))
        })
        .map(|(index, _)| index)?;
    Some(remaining.remove(index))
}

fn take_nearest(remaining: &mut Vec<CellCoord>, cluster: &[CellCoord]) -> Option<CellCoord> {
    let index = remaining
        .iter()
        .enumerate()
        .min_by_key(|(_, site)| {
            let distance = cluster
                .iter()
                .map(|member| member.manhattan_distance(**site))
                .min()
                .unwrap_or(u32::MAX);
            (distance, **site)
        })
        .map(|(index, _)| index)?;
    Some(remaining.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn defender(id: u32, row: u32, column: u32) -> (AgentId, CellCoord) {
        (AgentId::new(id), CellCoord::new(row, column))
    }

    #[test]
    fn clusters_stay_spatially_compact() {
        let sites = [
            CellCoord::new(0, 0),
            CellCoord::new(0, 1),
            CellCoord::new(9, 9),
            CellCoord::new(9, 8),
        ];
        let defenders = [defender(1, 0, 5), defender(2, 9, 5)];
        let assignment = partition(&sites, &defenders);

        let first = assignment.sites_for(AgentId::new(1));
        let second = assignment.sites_for(AgentId::new(2));
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(
            (first.contains(&CellCoord::new(0, 0)) && first.contains(&CellCoord::new(0, 1)))
                || (second.contains(&CellCoord::new(0, 0))
                    && second.contains(&CellCoord::new(0, 1))),
            "neighbouring sites should share an owner: {assignment:?}"
        );
    }

    #[test]
    fn cluster_goes_to_nearest_defender() {
        let sites = [CellCoord::new(0, 0), CellCoord::new(9, 9)];
        let defenders = [defender(1, 9, 8), defender(2, 0, 1)];
        let assignment = partition(&sites, &defenders);

        assert_eq!(assignment.owner_of(CellCoord::new(9, 9)), Some(AgentId::new(1)));
        assert_eq!(assignment.owner_of(CellCoord::new(0, 0)), Some(AgentId::new(2)));
    }

    #[test]
    fn surplus_defenders_receive_nothing() {
        let sites = [CellCoord::new(3, 3)];
        let defenders = [defender(1, 0, 0), defender(2, 3, 4), defender(3, 9, 9)];
        let assignment = partition(&sites, &defenders);

        assert_eq!(assignment.site_count(), 1);
        assert_eq!(assignment.owner_of(CellCoord::new(3, 3)), Some(AgentId::new(2)));
        assert!(assignment.sites_for(AgentId::new(1)).is_empty());
        assert!(assignment.sites_for(AgentId::new(3)).is_empty());
    }

    #[test]
    fn no_defenders_means_no_owners() {
        let assignment = partition(&[CellCoord::new(1, 1)], &[]);
        assert_eq!(assignment.site_count(), 0);
        assert_eq!(assignment.iter().count(), 0);
    }

    #[test]
    fn walled_off_sites_are_not_assigned() {
        let board = Board::from_rows(&[
            "..s#s", //
            "...#.",
        ])
        .expect("valid board");
        let defenders = [defender(1, 0, 0)];
        let mut allocator = ObjectiveAllocator::new();
        let assignment = allocator.allocate(&board, &board.bombsites(), &defenders);

        assert_eq!(assignment.sites_for(AgentId::new(1)), &[CellCoord::new(0, 2)]);
        assert_eq!(assignment.owner_of(CellCoord::new(0, 4)), None);
    }

    #[test]
    fn sites_do_not_act_as_corridors() {
        // The right site is only reachable by walking over the left one.
        let board = Board::from_rows(&["#####", ".s.s#", "#####"]).expect("valid board");
        let defenders = [defender(1, 1, 0)];
        let mut allocator = ObjectiveAllocator::new();
        let reachable = allocator.reachable_sites(&board, &board.bombsites(), &defenders);

        assert_eq!(reachable, vec![CellCoord::new(1, 1)]);
    }

    proptest! {
        #[test]
        fn partition_covers_every_site_once_with_balanced_counts(
            raw_sites in proptest::collection::btree_set((0u32..12, 0u32..12), 0..20),
            raw_defenders in proptest::collection::btree_map(0u32..10, (0u32..12, 0u32..12), 1..6),
        ) {
            let sites: Vec<CellCoord> = raw_sites
                .into_iter()
                .map(|(row, column)| CellCoord::new(row, column))
                .collect();
            let defenders: Vec<(AgentId, CellCoord)> = raw_defenders
                .into_iter()
                .map(|(id, (row, column))| (AgentId::new(id), CellCoord::new(row, column)))
                .collect();

            let assignment = partition(&sites, &defenders);

            let mut assigned: Vec<CellCoord> = assignment
                .iter()
                .flat_map(|(_, owned)| owned.iter().copied())
                .collect();
            assigned.sort();
            prop_assert_eq!(&assigned, &sites);

            let counts: Vec<usize> = defenders
                .iter()
                .map(|(id, _)| assignment.sites_for(*id).len())
                .collect();
            let max = counts.iter().copied().max().unwrap_or(0);
            let min = counts.iter().copied().min().unwrap_or(0);
            prop_assert!(max - min <= 1, "unbalanced counts {:?}", counts);
        }
    }
}

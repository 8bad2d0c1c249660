//! Graded device-sound propagation used to infer device locations.

use bombsite_core::{Board, CellCoord, SoundIntensity, SoundRanges};

use crate::navigation::{index, neighbors};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum BandSlot {
    #[default]
    Silent,
    Unique(CellCoord),
    Ambiguous,
}

impl BandSlot {
    fn record(&mut self, source: CellCoord) {
        *self = match *self {
            Self::Silent => Self::Unique(source),
            Self::Unique(existing) if existing == source => Self::Unique(existing),
            Self::Unique(_) | Self::Ambiguous => Self::Ambiguous,
        };
    }

    fn source(self) -> Option<CellCoord> {
        match self {
            Self::Unique(source) => Some(source),
            Self::Silent | Self::Ambiguous => None,
        }
    }
}

/// Per-cell record of which bombsite, if any, is uniquely audible in each band.
///
/// A band is kept at a cell only when exactly one site produces it there; a
/// band produced by two or more sites cannot tell them apart and is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalMap {
    columns: u32,
    rows: u32,
    cells: Vec<[BandSlot; 3]>,
}

impl SignalMap {
    /// Propagates every site's sound over non-wall cells up to the weak range.
    #[must_use]
    pub fn build(board: &Board, sites: &[CellCoord], ranges: SoundRanges) -> Self {
        let mut map = Self {
            columns: board.columns(),
            rows: board.rows(),
            cells: vec![[BandSlot::Silent; 3]; board.len()],
        };

        let Ok(width) = usize::try_from(board.columns()) else {
            return map;
        };

        let mut visited = vec![false; board.len()];
        let mut layer = Vec::new();
        let mut next_layer = Vec::new();

        for &site in sites {
            let Some(site_index) = index(width, site).filter(|_| board.contains(site)) else {
                continue;
            };

            visited.fill(false);
            visited[site_index] = true;
            layer.clear();
            layer.push(site);

            let mut hops = 1;
            while !layer.is_empty() && hops <= ranges.weak {
                let Some(band) = ranges.band_for(hops) else {
                    break;
                };

                next_layer.clear();
                for &cell in &layer {
                    for neighbor in neighbors(cell, board.columns(), board.rows()) {
                        if board.is_wall(neighbor) {
                            continue;
                        }
                        let Some(neighbor_index) = index(width, neighbor) else {
                            continue;
                        };
                        if visited[neighbor_index] {
                            continue;
                        }
                        visited[neighbor_index] = true;
                        map.cells[neighbor_index][band.index()].record(site);
                        next_layer.push(neighbor);
                    }
                }

                std::mem::swap(&mut layer, &mut next_layer);
                hops += 1;
            }
        }

        map
    }

    /// Site uniquely heard at `cell` with the given intensity.
    #[must_use]
    pub fn source_for(&self, cell: CellCoord, intensity: SoundIntensity) -> Option<CellCoord> {
        self.slots(cell)
            .and_then(|slots| slots[intensity.index()].source())
    }

    /// Unambiguous `(intensity, site)` pairs at `cell`, strongest first.
    pub fn signals_at(
        &self,
        cell: CellCoord,
    ) -> impl Iterator<Item = (SoundIntensity, CellCoord)> + '_ {
        SoundIntensity::ALL
            .into_iter()
            .filter_map(move |intensity| {
                self.source_for(cell, intensity)
                    .map(|site| (intensity, site))
            })
    }

    /// Every cell from which `site` is the unique source of at least one band,
    /// in row-major order.
    #[must_use]
    pub fn coverage_cells(&self, site: CellCoord) -> Vec<CellCoord> {
        let Ok(width) = usize::try_from(self.columns) else {
            return Vec::new();
        };

        self.cells
            .iter()
            .enumerate()
            .filter(|(_, slots)| slots.iter().any(|slot| slot.source() == Some(site)))
            .filter_map(|(offset, _)| {
                let row = u32::try_from(offset / width).ok()?;
                let column = u32::try_from(offset % width).ok()?;
                Some(CellCoord::new(row, column))
            })
            .collect()
    }

    fn slots(&self, cell: CellCoord) -> Option<&[BandSlot; 3]> {
        if cell.column() >= self.columns || cell.row() >= self.rows {
            return None;
        }
        let width = usize::try_from(self.columns).ok()?;
        index(width, cell).and_then(|offset| self.cells.get(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGES: SoundRanges = SoundRanges {
        strong: 1,
        normal: 2,
        weak: 3,
    };

    #[test]
    fn bands_follow_hop_distance() {
        let board = Board::from_rows(&["s....", "....."]).expect("valid board");
        let site = CellCoord::new(0, 0);
        let map = SignalMap::build(&board, &[site], RANGES);

        assert_eq!(map.source_for(site, SoundIntensity::Strong), None);
        assert_eq!(
            map.source_for(CellCoord::new(0, 1), SoundIntensity::Strong),
            Some(site)
        );
        assert_eq!(
            map.source_for(CellCoord::new(1, 1), SoundIntensity::Normal),
            Some(site)
        );
        assert_eq!(
            map.source_for(CellCoord::new(0, 3), SoundIntensity::Weak),
            Some(site)
        );
        assert_eq!(map.signals_at(CellCoord::new(0, 4)).count(), 0);
        assert_eq!(map.signals_at(CellCoord::new(1, 4)).count(), 0);
    }

    #[test]
    fn walls_block_propagation() {
        let board = Board::from_rows(&["s#.", "..."]).expect("valid board");
        let site = CellCoord::new(0, 0);
        let map = SignalMap::build(&board, &[site], RANGES);

        assert_eq!(map.signals_at(CellCoord::new(0, 1)).count(), 0);
        assert_eq!(
            map.source_for(CellCoord::new(1, 2), SoundIntensity::Weak),
            Some(site)
        );
        // Four hops around the wall is out of range.
        assert_eq!(map.signals_at(CellCoord::new(0, 2)).count(), 0);
    }

    #[test]
    fn shared_band_is_discarded_but_distinct_bands_survive() {
        let board = Board::from_rows(&["s...s"]).expect("valid board");
        let left = CellCoord::new(0, 0);
        let right = CellCoord::new(0, 4);
        let map = SignalMap::build(&board, &[left, right], RANGES);

        // Middle cell is two hops from both sites: Normal is ambiguous.
        assert_eq!(map.signals_at(CellCoord::new(0, 2)).count(), 0);

        // One hop from the left site, three from the right one.
        let signals: Vec<_> = map.signals_at(CellCoord::new(0, 1)).collect();
        assert_eq!(
            signals,
            vec![
                (SoundIntensity::Strong, left),
                (SoundIntensity::Weak, right)
            ]
        );
    }

    #[test]
    fn coverage_cells_list_unique_positions() {
        let board = Board::from_rows(&["s...s"]).expect("valid board");
        let left = CellCoord::new(0, 0);
        let right = CellCoord::new(0, 4);
        let map = SignalMap::build(&board, &[left, right], RANGES);

        assert_eq!(
            map.coverage_cells(left),
            vec![CellCoord::new(0, 1), CellCoord::new(0, 3)]
        );
    }
}

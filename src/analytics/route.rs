//! Route suggestion (§4.9): given a chronological track and a grid cell
//! size, suggest the next waypoints by walking to the nearest unvisited
//! grid cell within a search radius.

use std::collections::HashSet;

/// A grid cell identified by integer indices at the configured cell size.
type CellIndex = (i64, i64);

fn cell_index(lat: f64, lon: f64, cell_size_degrees: f64) -> CellIndex {
    ((lat / cell_size_degrees).floor() as i64, (lon / cell_size_degrees).floor() as i64)
}

fn cell_center(cell: CellIndex, cell_size_degrees: f64) -> (f64, f64) {
    ((cell.0 as f64 + 0.5) * cell_size_degrees, (cell.1 as f64 + 0.5) * cell_size_degrees)
}

/// Suggest up to `steps` successor waypoints from `track`'s last point,
/// each the center of the nearest unvisited cell within `search_radius_cells`
/// (measured as squared cell-index distance, i.e. a Manhattan/Chebyshev-style
/// square search window rather than true Euclidean distance).
pub fn suggest_route(
    track: &[(f64, f64)],
    cell_size_degrees: f64,
    search_radius_cells: i64,
    steps: usize,
) -> Vec<(f64, f64)> {
    if track.is_empty() {
        return Vec::new();
    }

    let mut visited: HashSet<CellIndex> = track.iter().map(|&(lat, lon)| cell_index(lat, lon, cell_size_degrees)).collect();
    let (last_lat, last_lon) = track[track.len() - 1];
    let mut current = cell_index(last_lat, last_lon, cell_size_degrees);

    let mut waypoints = Vec::with_capacity(steps);

    for _ in 0..steps {
        let mut best: Option<(CellIndex, i64)> = None;
        for dx in -search_radius_cells..=search_radius_cells {
            for dy in -search_radius_cells..=search_radius_cells {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let candidate = (current.0 + dx, current.1 + dy);
                if visited.contains(&candidate) {
                    continue;
                }
                let dist_sq = dx * dx + dy * dy;
                if best.map(|(_, d)| dist_sq < d).unwrap_or(true) {
                    best = Some((candidate, dist_sq));
                }
            }
        }

        match best {
            Some((cell, _)) => {
                visited.insert(cell);
                waypoints.push(cell_center(cell, cell_size_degrees));
                current = cell;
            }
            None => break,
        }
    }

    waypoints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_nearest_unvisited_cell() {
        let track = vec![(0.0, 0.0)];
        let waypoints = suggest_route(&track, 0.001, 2, 1);
        assert_eq!(waypoints.len(), 1);
    }

    #[test]
    fn stops_when_no_unvisited_cell_in_radius() {
        let track = vec![(0.0, 0.0)];
        // Radius 0 means only the current cell is considered, which is visited.
        let waypoints = suggest_route(&track, 0.001, 0, 3);
        assert!(waypoints.is_empty());
    }

    #[test]
    fn empty_track_yields_no_waypoints() {
        assert!(suggest_route(&[], 0.001, 2, 3).is_empty());
    }

    #[test]
    fn successive_steps_do_not_revisit_cells() {
        let track = vec![(0.0, 0.0)];
        let waypoints = suggest_route(&track, 0.001, 3, 3);
        let cells: HashSet<(i64, i64)> = waypoints
            .iter()
            .map(|&(lat, lon)| cell_index(lat, lon, 0.001))
            .collect();
        assert_eq!(cells.len(), waypoints.len());
    }
}
